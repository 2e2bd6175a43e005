//! Versioned upgrades of the contact database.
//!
//! Each step is one DDL batch applied inside its own transaction together
//! with the version bump, so a failed step leaves the previous version
//! intact.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::{CONTACTS_V1, CONTACTS_V2, METADATA_TABLE};

/// Schema version written by this release.
pub const CURRENT_VERSION: i32 = 2;

const VERSION_KEY: &str = "schema_version";

struct Step {
    version: i32,
    label: &'static str,
    ddl: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        label: "contact table",
        ddl: CONTACTS_V1,
    },
    Step {
        version: 2,
        label: "direction and observation timestamps",
        ddl: CONTACTS_V2,
    },
];

/// Bring the database up to [`CURRENT_VERSION`].
///
/// Safe to call on every open.
///
/// # Errors
///
/// Returns an error if the stored version is unreadable or newer than this
/// release, or if a step fails.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(METADATA_TABLE)?;

    let stored = stored_version(conn)?;
    if stored > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for step in STEPS.iter().filter(|s| s.version > stored) {
        apply(conn, step)?;
    }
    Ok(())
}

/// Stored schema version, 0 when unset.
fn stored_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value.map_or(Ok(0), |v| {
        v.trim().parse().map_err(|_| Error::DatabaseMigration {
            message: format!("unreadable schema version {v:?}"),
        })
    })
}

fn apply(conn: &Connection, step: &Step) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(step.ddl)
        .map_err(|e| Error::DatabaseMigration {
            message: format!("v{} ({}): {e}", step.version, step.label),
        })?;
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, step.version.to_string()),
    )?;
    tx.commit()?;

    info!(version = step.version, "Applied schema step: {}", step.label);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM pragma_table_info('contacts')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect()
    }

    fn set_version(conn: &Connection, version: &str) {
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            (VERSION_KEY, version),
        )
        .unwrap();
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(stored_version(&conn).unwrap(), CURRENT_VERSION);
        let cols = columns(&conn);
        for column in ["callsign", "first_time", "status", "direction", "last_seen", "last_active"] {
            assert!(cols.iter().any(|c| c == column), "missing column {column}");
        }
    }

    #[test]
    fn test_ensure_schema_twice() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_v1_rows_survive_upgrade() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(METADATA_TABLE).unwrap();
        conn.execute_batch(CONTACTS_V1).unwrap();
        set_version(&conn, "1");
        conn.execute(
            "INSERT INTO contacts (callsign, first_time, status) VALUES ('DLH1', '08:15', 'Im Luftraum')",
            [],
        )
        .unwrap();

        ensure_schema(&conn).unwrap();

        assert_eq!(stored_version(&conn).unwrap(), 2);
        let (status, direction): (String, Option<String>) = conn
            .query_row(
                "SELECT status, direction FROM contacts WHERE callsign = 'DLH1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "Im Luftraum");
        assert_eq!(direction, None);
    }

    #[test]
    fn test_newer_database_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        set_version(&conn, "9");

        let err = ensure_schema(&conn).unwrap_err();
        assert!(matches!(err, Error::DatabaseMigration { .. }));
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn test_garbage_version_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(METADATA_TABLE).unwrap();
        set_version(&conn, "two");

        assert!(ensure_schema(&conn).is_err());
    }

    #[test]
    fn test_indexes_created() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='contacts'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect();
        assert!(indexes.iter().any(|n| n == "idx_contacts_status_first"));
        assert!(indexes.iter().any(|n| n == "idx_contacts_last_seen"));
    }
}
