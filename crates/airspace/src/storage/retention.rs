//! Retention policy for Past contact records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use super::ContactRecord;
use crate::aircraft::Status;

/// Default number of Past records kept.
pub const DEFAULT_MAX_PAST: usize = 7;

/// Default time a Past record stays visible after it was last active.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 10;

/// Bounds on how many Past records are retained and for how long.
///
/// Active records are never evicted. The time cap is applied first, then the
/// count cap keeps the newest Past records by first-seen time.
///
/// Callsigns in the current snapshot are held: they never count against the
/// count cap, and the time cap only evicts them when they were absent from
/// the feed for longer than `max_age`. An aircraft sitting on the ground in
/// range therefore keeps its first-seen time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of Past records kept.
    pub max_past: usize,
    /// Maximum time since a Past record was last active, if any.
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_past: DEFAULT_MAX_PAST,
            max_age: Some(Duration::minutes(DEFAULT_MAX_AGE_MINUTES)),
        }
    }
}

impl RetentionPolicy {
    /// Records whose reference time is before this instant are expired.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.max_age.map(|age| now - age)
    }

    /// Whether a Past record has outlived the time cap.
    #[must_use]
    pub fn is_expired(&self, record: &ContactRecord, now: DateTime<Utc>) -> bool {
        self.cutoff(now)
            .is_some_and(|cutoff| record.retention_reference() < cutoff)
    }

    /// Select the callsigns this policy evicts from a table.
    ///
    /// `held` is the set of callsigns in the current snapshot.
    #[must_use]
    pub fn select_evictions(
        &self,
        records: &BTreeMap<String, ContactRecord>,
        held: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let cutoff = self.cutoff(now);
        let mut evicted = Vec::new();
        let mut ranked: Vec<(&String, &ContactRecord)> = Vec::new();

        for (callsign, record) in records {
            if record.status != Status::Past {
                continue;
            }
            let is_held = held.contains(callsign);
            let reference = if is_held {
                record.presence_reference()
            } else {
                record.retention_reference()
            };
            if cutoff.is_some_and(|cutoff| reference < cutoff) {
                evicted.push(callsign.clone());
            } else if !is_held {
                ranked.push((callsign, record));
            }
        }

        ranked.sort_by(|(a_cs, a), (b_cs, b)| {
            b.first_time.cmp(&a.first_time).then_with(|| a_cs.cmp(b_cs))
        });
        evicted.extend(
            ranked
                .into_iter()
                .skip(self.max_past)
                .map(|(callsign, _)| callsign.clone()),
        );
        evicted
    }
}
