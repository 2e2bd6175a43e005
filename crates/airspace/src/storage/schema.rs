//! `SQLite` DDL for the contact table, one batch per schema version.

/// Key-value table holding the schema version.
pub const METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Version 1: one row per callsign with the first-contact time and status.
pub const CONTACTS_V1: &str = r"
CREATE TABLE IF NOT EXISTS contacts (
    callsign TEXT PRIMARY KEY,
    first_time TEXT NOT NULL,
    status TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_contacts_status_first ON contacts(status, first_time DESC);
";

/// Version 2: sticky heading and observation timestamps.
pub const CONTACTS_V2: &str = r"
ALTER TABLE contacts ADD COLUMN direction TEXT;
ALTER TABLE contacts ADD COLUMN last_seen TEXT;
ALTER TABLE contacts ADD COLUMN last_active TEXT;
CREATE INDEX IF NOT EXISTS idx_contacts_last_seen ON contacts(last_seen);
";
