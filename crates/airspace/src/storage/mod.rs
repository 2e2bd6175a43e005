//! Storage layer for the airspace monitor.
//!
//! This module provides the [`ContactStore`], the single source of truth for
//! per-callsign tracking state. The in-memory table is authoritative for the
//! running process; every change is written through to a pluggable
//! [`ContactBackend`] (a flat JSON file or `SQLite`).
//!
//! Backend failures never reach the caller. Loads that fail start from an
//! empty table, and writes that fail are logged and counted; the next poll
//! writes the record again.

pub mod file;
pub mod legacy;
pub mod migrations;
pub mod retention;
pub mod schema;
pub mod sqlite;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aircraft::{Compass, Status};
use crate::error::Result;

pub use file::JsonFileBackend;
pub use legacy::RawContact;
pub use retention::RetentionPolicy;
pub use sqlite::SqliteBackend;

/// Persisted tracking metadata for one aircraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    /// First observation in the current tracking episode.
    pub first_time: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: Status,
    /// Heading recorded at the first Active observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Compass>,
    /// Last poll the aircraft was in the eligible snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Last poll the aircraft was Active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
}

impl ContactRecord {
    /// A record first seen at `first_time`.
    #[must_use]
    pub fn new(first_time: DateTime<Utc>, status: Status, direction: Option<Compass>) -> Self {
        Self {
            first_time,
            status,
            direction,
            last_seen: Some(first_time),
            last_active: (status == Status::Active).then_some(first_time),
        }
    }

    /// The instant retention age is measured from: last activity, else last
    /// observation, else first contact.
    #[must_use]
    pub fn retention_reference(&self) -> DateTime<Utc> {
        self.last_active
            .or(self.last_seen)
            .unwrap_or(self.first_time)
    }

    /// Last time the aircraft was in the feed at all.
    #[must_use]
    pub fn presence_reference(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or(self.first_time)
    }
}

/// Canonical text form of a stored timestamp.
///
/// Every backend stores timestamps in this form so they order lexically.
#[must_use]
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Which persistence backend holds the contact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A flat JSON object file.
    #[default]
    File,
    /// A `SQLite` database.
    Sqlite,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// The contact table as read from a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedTable {
    /// Interpreted records.
    pub records: BTreeMap<String, ContactRecord>,
    /// Callsigns whose rows were in a legacy format.
    pub migrated: Vec<String>,
    /// Number of rows that could not be interpreted.
    pub dropped: usize,
}

/// Durable key-value persistence for contact records.
///
/// Implementations must tolerate repeated and out-of-order upserts; the last
/// write for a callsign wins.
pub trait ContactBackend: Send + std::fmt::Debug {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Read the full table, migrating legacy rows in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_all(&mut self, now: DateTime<Utc>) -> Result<LoadedTable>;

    /// Insert or replace the record for a callsign.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert(&mut self, callsign: &str, record: &ContactRecord) -> Result<()>;

    /// Remove the record for a callsign. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&mut self, callsign: &str) -> Result<bool>;

    /// Apply a retention policy, holding the callsigns in `held`. Returns
    /// the number of records removed.
    ///
    /// Must evict exactly what [`RetentionPolicy::select_evictions`] selects.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn prune(
        &mut self,
        policy: &RetentionPolicy,
        held: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<usize>;
}

/// Open the configured backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be created (for example, the
/// database directory cannot be created).
pub fn open_backend(kind: BackendKind, path: PathBuf) -> Result<Box<dyn ContactBackend>> {
    Ok(match kind {
        BackendKind::File => Box::new(JsonFileBackend::new(path)),
        BackendKind::Sqlite => Box::new(SqliteBackend::open(path)?),
    })
}

/// Per-callsign tracking state with write-through persistence.
#[derive(Debug)]
pub struct ContactStore {
    backend: Box<dyn ContactBackend>,
    records: BTreeMap<String, ContactRecord>,
    write_failures: u64,
}

impl ContactStore {
    /// Wrap a backend without loading it.
    #[must_use]
    pub fn new(backend: Box<dyn ContactBackend>) -> Self {
        Self {
            backend,
            records: BTreeMap::new(),
            write_failures: 0,
        }
    }

    /// Wrap a backend and load its table.
    #[must_use]
    pub fn open(backend: Box<dyn ContactBackend>) -> Self {
        let mut store = Self::new(backend);
        store.load(Utc::now());
        store
    }

    /// Reload the full table from the backend.
    ///
    /// A missing or unreadable backing store yields an empty table.
    pub fn load(&mut self, now: DateTime<Utc>) -> &BTreeMap<String, ContactRecord> {
        match self.backend.load_all(now) {
            Ok(table) => {
                if !table.migrated.is_empty() || table.dropped > 0 {
                    info!(
                        migrated = table.migrated.len(),
                        dropped = table.dropped,
                        "Migrated legacy contact records"
                    );
                }
                info!(
                    backend = %self.backend.kind(),
                    count = table.records.len(),
                    "Loaded contact records"
                );
                self.records = table.records;
            }
            Err(e) => {
                warn!(backend = %self.backend.kind(), "Contact table unreadable, starting empty: {e}");
                self.records.clear();
            }
        }
        &self.records
    }

    /// The current table.
    #[must_use]
    pub fn records(&self) -> &BTreeMap<String, ContactRecord> {
        &self.records
    }

    /// The record for a callsign.
    #[must_use]
    pub fn get(&self, callsign: &str) -> Option<&ContactRecord> {
        self.records.get(callsign)
    }

    /// Number of tracked callsigns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Which backend persists this store.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Number of backend writes that failed since the store was created.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Insert or replace a record and write it through.
    ///
    /// The in-memory table is updated even if the write fails. Returns
    /// whether the backend accepted the write.
    pub fn upsert(&mut self, callsign: &str, record: ContactRecord) -> bool {
        let persisted = match self.backend.upsert(callsign, &record) {
            Ok(()) => true,
            Err(e) => {
                self.write_failures += 1;
                warn!(callsign, "Failed to persist contact record: {e}");
                false
            }
        };
        self.records.insert(callsign.to_string(), record);
        persisted
    }

    /// Remove a record. Returns whether it existed in memory.
    pub fn delete(&mut self, callsign: &str) -> bool {
        if let Err(e) = self.backend.delete(callsign) {
            self.write_failures += 1;
            warn!(callsign, "Failed to delete contact record: {e}");
        }
        self.records.remove(callsign).is_some()
    }

    /// Evict Past records outside the retention window. Callsigns in `held`
    /// (the current snapshot) are exempt from the count cap.
    ///
    /// Returns the evicted callsigns.
    pub fn prune(
        &mut self,
        policy: &RetentionPolicy,
        held: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let evicted = policy.select_evictions(&self.records, held, now);
        if evicted.is_empty() {
            return evicted;
        }
        for callsign in &evicted {
            self.records.remove(callsign);
        }
        match self.backend.prune(policy, held, now) {
            Ok(removed) => debug!(removed, "Pruned contact backend"),
            Err(e) => {
                self.write_failures += 1;
                warn!("Failed to prune contact backend: {e}");
            }
        }
        debug!(count = evicted.len(), "Evicted past contacts");
        evicted
    }

    /// Past records, newest first.
    #[must_use]
    pub fn past_records(&self) -> Vec<(&String, &ContactRecord)> {
        let mut past: Vec<_> = self
            .records
            .iter()
            .filter(|(_, record)| record.status == Status::Past)
            .collect();
        past.sort_by(|(a_cs, a), (b_cs, b)| {
            b.first_time.cmp(&a.first_time).then_with(|| a_cs.cmp(b_cs))
        });
        past
    }
}
