//! Flat JSON file contact backend.
//!
//! The file holds one JSON object keyed by callsign. Every change rewrites
//! the whole file through a temporary sibling and a rename, so a crash never
//! leaves a half-written table behind.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::legacy::{interpret, Interpreted, RawContact, LEGACY_STATUS_SUFFIX};
use super::retention::RetentionPolicy;
use super::{BackendKind, ContactBackend, ContactRecord, LoadedTable};
use crate::error::{Error, Result};

/// Contact backend persisting the table as a JSON object file.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    records: BTreeMap<String, ContactRecord>,
}

impl JsonFileBackend {
    /// Create a backend for the given file. Nothing is read until
    /// [`ContactBackend::load_all`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    /// Get the path to the contact file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_error(&self, source: std::io::Error) -> Error {
        Error::StoreFile {
            path: self.path.clone(),
            source,
        }
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let body = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| self.file_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.file_error(e))?;
        Ok(())
    }

    /// Split a stored document into raw rows, pairing bare-string values
    /// with their sibling status keys.
    fn raw_rows(document: &Map<String, Value>) -> (Vec<(String, RawContact)>, usize) {
        let mut rows = Vec::new();
        let mut skipped = 0;

        for (key, value) in document {
            if let Some(base) = key.strip_suffix(LEGACY_STATUS_SUFFIX) {
                if document.get(base).is_some_and(Value::is_string) {
                    continue;
                }
            }
            match value {
                Value::String(first_time) => {
                    let status = document
                        .get(&format!("{key}{LEGACY_STATUS_SUFFIX}"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    rows.push((key.clone(), RawContact::legacy(first_time.clone(), status)));
                }
                Value::Object(fields) => match Self::raw_from_object(fields) {
                    Some(raw) => rows.push((key.clone(), raw)),
                    None => skipped += 1,
                },
                _ => skipped += 1,
            }
        }
        (rows, skipped)
    }

    fn raw_from_object(fields: &Map<String, Value>) -> Option<RawContact> {
        let text = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| fields.get(*name).and_then(Value::as_str))
                .map(str::to_string)
        };
        Some(RawContact {
            first_time: text(&["firstTime"])?,
            status: text(&["status"]),
            direction: text(&["direction"]),
            last_seen: text(&["lastSeen", "lastSeenIso"]),
            last_active: text(&["lastActive", "lastActiveIso"]),
        })
    }
}

impl ContactBackend for JsonFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn load_all(&mut self, now: DateTime<Utc>) -> Result<LoadedTable> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Contact file missing, creating it");
            self.records.clear();
            self.flush()?;
            return Ok(LoadedTable::default());
        }

        let body = std::fs::read_to_string(&self.path).map_err(|e| self.file_error(e))?;
        let document: Map<String, Value> = serde_json::from_str(&body)?;
        let (rows, mut dropped) = Self::raw_rows(&document);

        let mut table = LoadedTable::default();
        for (callsign, raw) in rows {
            match interpret(&raw, now) {
                Interpreted::Current(record) => {
                    table.records.insert(callsign, record);
                }
                Interpreted::Migrated(record) => {
                    table.migrated.push(callsign.clone());
                    table.records.insert(callsign, record);
                }
                Interpreted::Malformed => {
                    debug!(callsign = %callsign, "Dropping malformed contact entry");
                    dropped += 1;
                }
            }
        }
        table.dropped = dropped;

        self.records = table.records.clone();
        let rewrite = !table.migrated.is_empty()
            || table.dropped > 0
            || document.len() != self.records.len();
        if rewrite {
            self.flush()?;
        }
        Ok(table)
    }

    fn upsert(&mut self, callsign: &str, record: &ContactRecord) -> Result<()> {
        self.records.insert(callsign.to_string(), record.clone());
        self.flush()
    }

    fn delete(&mut self, callsign: &str) -> Result<bool> {
        let existed = self.records.remove(callsign).is_some();
        if existed {
            self.flush()?;
        }
        Ok(existed)
    }

    fn prune(
        &mut self,
        policy: &RetentionPolicy,
        held: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let evicted = policy.select_evictions(&self.records, held, now);
        if evicted.is_empty() {
            return Ok(0);
        }
        for callsign in &evicted {
            self.records.remove(callsign);
        }
        self.flush()?;
        Ok(evicted.len())
    }
}
