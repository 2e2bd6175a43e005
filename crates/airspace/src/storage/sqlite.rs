//! `SQLite` contact backend.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::legacy::{interpret, Interpreted, RawContact};
use super::{format_timestamp, migrations, BackendKind, ContactBackend, ContactRecord, LoadedTable};
use super::retention::RetentionPolicy;
use crate::aircraft::Language;
use crate::error::{Error, Result};

/// Contact backend storing one row per callsign in `SQLite`.
#[derive(Debug)]
pub struct SqliteBackend {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl SqliteBackend {
    /// Open or create a contact database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist
    /// and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::ensure_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::ensure_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count stored rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<(String, RawContact)> {
        Ok((
            row.get(0)?,
            RawContact {
                first_time: row.get(1)?,
                status: row.get(2)?,
                direction: row.get(3)?,
                last_seen: row.get(4)?,
                last_active: row.get(5)?,
            },
        ))
    }
}

impl ContactBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn load_all(&mut self, now: DateTime<Utc>) -> Result<LoadedTable> {
        let rows = {
            let mut stmt = self.conn.prepare(
                r"
                SELECT callsign, first_time, status, direction, last_seen, last_active
                FROM contacts
                ",
            )?;
            let rows = stmt
                .query_map([], Self::row_to_raw)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut table = LoadedTable::default();
        let mut malformed = Vec::new();
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
                    debug!(callsign = %callsign, "Dropping malformed contact row");
                    malformed.push(callsign);
                }
            }
        }

        for callsign in &table.migrated {
            if let Some(record) = table.records.get(callsign) {
                self.upsert(callsign, record)?;
            }
        }
        for callsign in &malformed {
            self.delete(callsign)?;
        }
        table.dropped = malformed.len();

        Ok(table)
    }

    fn upsert(&mut self, callsign: &str, record: &ContactRecord) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO contacts (callsign, first_time, status, direction, last_seen, last_active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ON CONFLICT(callsign) DO UPDATE SET
                first_time = excluded.first_time,
                status = excluded.status,
                direction = excluded.direction,
                last_seen = excluded.last_seen,
                last_active = excluded.last_active,
                updated_at = excluded.updated_at
            ",
            params![
                callsign,
                format_timestamp(record.first_time),
                record.status.to_string(),
                record.direction.map(|d| d.label(Language::En)),
                record.last_seen.map(format_timestamp),
                record.last_active.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    fn delete(&mut self, callsign: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM contacts WHERE callsign = ?1", [callsign])?;
        Ok(affected > 0)
    }

    fn prune(
        &mut self,
        policy: &RetentionPolicy,
        held: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let held = serde_json::to_string(held)?;
        let tx = self.conn.transaction()?;
        let mut removed = 0;

        if let Some(cutoff) = policy.cutoff(now) {
            removed += tx.execute(
                r"
                DELETE FROM contacts
                WHERE status = 'past' AND (
                    CASE WHEN callsign IN (SELECT value FROM json_each(?2))
                        THEN COALESCE(last_seen, first_time)
                        ELSE COALESCE(last_active, last_seen, first_time)
                    END
                ) < ?1
                ",
                params![format_timestamp(cutoff), held],
            )?;
        }

        let keep = i64::try_from(policy.max_past).unwrap_or(i64::MAX);
        removed += tx.execute(
            r"
            DELETE FROM contacts
            WHERE status = 'past'
              AND callsign NOT IN (SELECT value FROM json_each(?2))
              AND callsign NOT IN (
                SELECT callsign FROM contacts
                WHERE status = 'past' AND callsign NOT IN (SELECT value FROM json_each(?2))
                ORDER BY first_time DESC, callsign ASC LIMIT ?1
              )
            ",
            params![keep, held],
        )?;

        tx.commit()?;
        if removed > 0 {
            info!("Pruned {} past contacts", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    use crate::aircraft::{Compass, Status};

    fn create_test_backend() -> SqliteBackend {
        SqliteBackend::open_in_memory().expect("failed to create test backend")
    }

    fn past_record(first: DateTime<Utc>) -> ContactRecord {
        let mut record = ContactRecord::new(first, Status::Past, None);
        record.last_seen = Some(first);
        record
    }

    #[test]
    fn test_open_in_memory() {
        assert!(SqliteBackend::open_in_memory().is_ok());
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contacts.db");
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn test_upsert_and_load() {
        let mut backend = create_test_backend();
        let now = Utc::now().trunc_subsecs(3);
        let record = ContactRecord::new(now, Status::Active, Some(Compass::NW));

        backend.upsert("EZY12", &record).unwrap();
        let table = backend.load_all(now).unwrap();

        assert_eq!(table.records.get("EZY12"), Some(&record));
        assert!(table.migrated.is_empty());
        assert_eq!(table.dropped, 0);
    }

    #[test]
    fn test_upsert_replaces() {
        let mut backend = create_test_backend();
        let now = Utc::now().trunc_subsecs(3);
        backend
            .upsert("EZY12", &ContactRecord::new(now, Status::Active, None))
            .unwrap();
        backend
            .upsert("EZY12", &ContactRecord::new(now, Status::Past, None))
            .unwrap();

        assert_eq!(backend.count().unwrap(), 1);
        let table = backend.load_all(now).unwrap();
        assert_eq!(table.records["EZY12"].status, Status::Past);
    }

    #[test]
    fn test_delete() {
        let mut backend = create_test_backend();
        backend
            .upsert("EZY12", &ContactRecord::new(Utc::now(), Status::Active, None))
            .unwrap();
        assert!(backend.delete("EZY12").unwrap());
        assert!(!backend.delete("EZY12").unwrap());
    }

    #[test]
    fn test_legacy_rows_migrated_and_rewritten() {
        let mut backend = create_test_backend();
        backend
            .conn
            .execute(
                "INSERT INTO contacts (callsign, first_time, status) VALUES ('DLH1', '00:00', 'Im Luftraum')",
                [],
            )
            .unwrap();
        backend
            .conn
            .execute(
                "INSERT INTO contacts (callsign, first_time, status) VALUES ('JUNK', 'soon', NULL)",
                [],
            )
            .unwrap();

        let now = Utc::now();
        let table = backend.load_all(now).unwrap();
        assert_eq!(table.migrated, vec!["DLH1".to_string()]);
        assert_eq!(table.dropped, 1);
        assert_eq!(table.records["DLH1"].status, Status::Active);

        let status: String = backend
            .conn
            .query_row(
                "SELECT status FROM contacts WHERE callsign = 'DLH1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "active");
        assert_eq!(backend.count().unwrap(), 1);

        let again = backend.load_all(now).unwrap();
        assert!(again.migrated.is_empty());
    }

    #[test]
    fn test_prune_matches_policy() {
        let mut backend = create_test_backend();
        let now = Utc::now().trunc_subsecs(3);
        let mut expected = std::collections::BTreeMap::new();

        for i in 0..12 {
            let record = past_record(now - Duration::minutes(i));
            backend.upsert(&format!("P{i:02}"), &record).unwrap();
            expected.insert(format!("P{i:02}"), record);
        }
        let active = ContactRecord::new(now - Duration::hours(1), Status::Active, None);
        backend.upsert("LIVE", &active).unwrap();
        expected.insert("LIVE".to_string(), active);

        let policy = RetentionPolicy::default();
        let mut evictions = policy.select_evictions(&expected, &BTreeSet::new(), now);
        evictions.sort();

        let removed = backend.prune(&policy, &BTreeSet::new(), now).unwrap();
        assert_eq!(removed, evictions.len());

        let table = backend.load_all(now).unwrap();
        for callsign in &evictions {
            assert!(!table.records.contains_key(callsign));
        }
        assert_eq!(table.records.len(), 13 - evictions.len());
        assert!(table.records.contains_key("LIVE"));
    }

    #[test]
    fn test_prune_without_time_cap() {
        let mut backend = create_test_backend();
        let now = Utc::now().trunc_subsecs(3);
        for i in 0..3 {
            backend
                .upsert(&format!("P{i}"), &past_record(now - Duration::days(i)))
                .unwrap();
        }
        let policy = RetentionPolicy {
            max_past: 2,
            max_age: None,
        };
        assert_eq!(backend.prune(&policy, &BTreeSet::new(), now).unwrap(), 1);
        let table = backend.load_all(now).unwrap();
        assert!(!table.records.contains_key("P2"));
    }

    #[test]
    fn test_prune_holds_callsigns_in_snapshot() {
        let mut backend = create_test_backend();
        let now = Utc::now().trunc_subsecs(3);
        let mut table = std::collections::BTreeMap::new();

        for i in 0..9 {
            let mut ground = past_record(now - Duration::minutes(30 + i));
            ground.last_seen = Some(now - Duration::seconds(10));
            table.insert(format!("G{i}"), ground);
        }
        let mut landed = past_record(now - Duration::minutes(40));
        landed.last_active = Some(now - Duration::minutes(25));
        landed.last_seen = Some(now - Duration::seconds(30));
        table.insert("LANDED".to_string(), landed);
        table.insert("RECENT".to_string(), past_record(now - Duration::minutes(1)));
        for (callsign, record) in &table {
            backend.upsert(callsign, record).unwrap();
        }

        let held: BTreeSet<String> = (0..9).map(|i| format!("G{i}")).collect();
        let policy = RetentionPolicy {
            max_past: 0,
            max_age: Some(Duration::minutes(10)),
        };
        let mut expected = policy.select_evictions(&table, &held, now);
        expected.sort();
        assert_eq!(expected, vec!["LANDED".to_string(), "RECENT".to_string()]);

        assert_eq!(backend.prune(&policy, &held, now).unwrap(), 2);
        let loaded = backend.load_all(now).unwrap();
        assert_eq!(loaded.records.len(), 9);
        assert!(held.iter().all(|cs| loaded.records.contains_key(cs)));
    }
}
