//! `airspace_monitor` - Track aircraft passing over a fixed point
//!
//! This library polls a flight-state feed, keeps a short per-callsign history
//! of which aircraft are in the airspace and which have passed, and produces
//! the bounded display list served to low-refresh-rate clients.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod aircraft;
pub mod airline;
pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod logging;
pub mod poller;
pub mod storage;
pub mod upstream;

pub use aircraft::{DisplayEntry, StateVector};
pub use config::Config;
pub use engine::ReconciliationEngine;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use poller::PollOrchestrator;
pub use storage::ContactStore;
