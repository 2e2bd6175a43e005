//! Logging setup for the airspace monitor.
//!
//! Poll cycles, fallbacks and persistence failures are reported through
//! `tracing`. Log lines go to stderr so that `poll --json` and
//! `contacts --json` keep stdout clean.

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Verbosity level selected by `-q` / `-v` / `-vv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything, including dependency traces.
    Trace,
}

impl Verbosity {
    /// Map command-line flags to a verbosity.
    ///
    /// `quiet` wins over any number of `-v` flags.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Level applied to this crate's own targets.
    #[must_use]
    pub fn level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    ///
    /// Dependencies (hyper, reqwest, rusqlite) stay at warn unless tracing
    /// everything.
    #[must_use]
    pub fn directives(self) -> String {
        let (deps, own) = match self {
            Self::Quiet => ("error", "error"),
            Self::Normal => ("warn", "info"),
            Self::Verbose => ("warn", "debug"),
            Self::Trace => ("debug", "trace"),
        };
        format!("{deps},airspace_monitor={own},airspace={own}")
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`. Only the first call
/// installs anything.
///
/// ```no_run
/// use airspace_monitor::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}
