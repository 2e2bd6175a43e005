//! Conversion of stored rows into contact records.
//!
//! Older installations stored the first-seen time as a bare `HH:MM` string,
//! sometimes with the status in a sibling `<callsign>_status` key, and used
//! German status labels. Rows in those shapes are migrated on load; rows
//! that cannot be interpreted are dropped.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};

use super::ContactRecord;
use crate::aircraft::{Compass, Status};

/// Suffix of the sibling key that held the status of a bare-string record.
pub const LEGACY_STATUS_SUFFIX: &str = "_status";

/// A stored row before interpretation. All fields are kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawContact {
    /// First-seen time: RFC 3339 or legacy `HH:MM`.
    pub first_time: String,
    /// Status label, if stored.
    pub status: Option<String>,
    /// Compass label, if stored.
    pub direction: Option<String>,
    /// Last observation, RFC 3339.
    pub last_seen: Option<String>,
    /// Last Active observation, RFC 3339.
    pub last_active: Option<String>,
}

impl RawContact {
    /// A bare-string legacy value with an optional sibling status.
    #[must_use]
    pub fn legacy(first_time: impl Into<String>, status: Option<String>) -> Self {
        Self {
            first_time: first_time.into(),
            status,
            ..Self::default()
        }
    }
}

/// Outcome of interpreting one stored row.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpreted {
    /// The row was already in the current format.
    Current(ContactRecord),
    /// The row was in a legacy format and must be written back.
    Migrated(ContactRecord),
    /// The row could not be interpreted.
    Malformed,
}

/// Interpret a stored row.
///
/// `now` anchors legacy `HH:MM` times to a calendar day.
#[must_use]
pub fn interpret(raw: &RawContact, now: DateTime<Utc>) -> Interpreted {
    let mut migrated = false;

    let first_time = if let Some(ts) = parse_timestamp(&raw.first_time) {
        ts
    } else if let Some(ts) = parse_time_of_day(&raw.first_time, now) {
        migrated = true;
        ts
    } else {
        return Interpreted::Malformed;
    };

    let status = match raw.status.as_deref() {
        Some(label @ ("active" | "past")) => Status::parse(label).unwrap_or(Status::Active),
        Some(label) => {
            migrated = true;
            Status::parse(label).unwrap_or(Status::Active)
        }
        None => {
            migrated = true;
            Status::Active
        }
    };

    let record = ContactRecord {
        first_time,
        status,
        direction: raw.direction.as_deref().and_then(Compass::parse),
        last_seen: raw.last_seen.as_deref().and_then(parse_timestamp),
        last_active: raw.last_active.as_deref().and_then(parse_timestamp),
    };

    if migrated {
        Interpreted::Migrated(record)
    } else {
        Interpreted::Current(record)
    }
}

/// Parse an RFC 3339 timestamp.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Interpret `HH:MM` as that local time on the day of `now`.
///
/// Times later than `now` are taken to be from the previous day.
fn parse_time_of_day(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()?;
    let today = now.with_timezone(&Local).date_naive();
    let local = Local.from_local_datetime(&today.and_time(time)).earliest()?;
    let instant = local.with_timezone(&Utc);
    if instant > now {
        Some(instant - Duration::days(1))
    } else {
        Some(instant)
    }
}
