//! Per-poll reconciliation of a feed snapshot against the contact store.
//!
//! One call to [`ReconciliationEngine::reconcile`] runs a full cycle:
//!
//! 1. Past records outside the retention window are evicted, so an aircraft
//!    that reappears after eviction starts a new contact.
//! 2. The snapshot is filtered to the monitored circle and the category
//!    allowlist.
//! 3. Every eligible aircraft gets its record created or updated. The first
//!    time stays fixed; the heading sticks once known.
//! 4. Active records missing from the eligible set turn Past.
//! 5. Retention is applied again.
//! 6. The display list is assembled from the live aircraft plus the retained
//!    Past records, deduplicated, sorted and truncated.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::aircraft::{
    round_distance, time_of_day, Compass, DisplayEntry, Language, StateVector, Status,
    NO_DIRECTION,
};
use crate::airline::AirlineResolver;
use crate::config::Config;
use crate::geo::GeoFilter;
use crate::storage::{ContactRecord, ContactStore, RetentionPolicy};

/// Counts describing one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleMetrics {
    /// State vectors in the snapshot.
    pub total_states: usize,
    /// States inside the monitored circle.
    pub in_radius: usize,
    /// In-radius states rejected by the category allowlist.
    pub filtered_by_category: usize,
    /// States that passed both filters.
    pub eligible: usize,
    /// Records created or updated from the snapshot.
    pub records_written: usize,
    /// Active records that turned Past.
    pub marked_past: usize,
    /// Past records evicted by retention.
    pub evicted: usize,
    /// Entries in the resulting display list.
    pub displayed: usize,
}

/// Output of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The display list.
    pub entries: Vec<DisplayEntry>,
    /// What happened.
    pub metrics: CycleMetrics,
}

/// Merges feed snapshots into the contact store.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    geo: GeoFilter,
    airlines: AirlineResolver,
    retention: RetentionPolicy,
    max_display: usize,
    language: Language,
}

impl ReconciliationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        geo: GeoFilter,
        airlines: AirlineResolver,
        retention: RetentionPolicy,
        max_display: usize,
        language: Language,
    ) -> Self {
        Self {
            geo,
            airlines,
            retention,
            max_display,
            language,
        }
    }

    /// Create an engine from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config, airlines: AirlineResolver) -> Self {
        Self::new(
            config.geo_filter(),
            airlines,
            config.retention_policy(),
            config.display.max_display_count,
            config.display.language,
        )
    }

    /// The eligibility filter.
    #[must_use]
    pub fn geo(&self) -> &GeoFilter {
        &self.geo
    }

    /// The retention policy applied on every cycle.
    #[must_use]
    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Maximum length of the display list.
    #[must_use]
    pub fn max_display(&self) -> usize {
        self.max_display
    }

    /// Merge a snapshot into the store and build the display list.
    pub fn reconcile(
        &self,
        states: &[StateVector],
        store: &mut ContactStore,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let mut metrics = CycleMetrics {
            total_states: states.len(),
            ..CycleMetrics::default()
        };
        let in_radius: Vec<&StateVector> =
            states.iter().filter(|s| self.geo.in_radius(s)).collect();
        let eligible: Vec<&StateVector> = in_radius
            .iter()
            .copied()
            .filter(|s| self.geo.category_allowed(s))
            .collect();
        metrics.in_radius = in_radius.len();
        metrics.eligible = eligible.len();
        metrics.filtered_by_category = in_radius.len() - eligible.len();

        // Aircraft still in the feed keep their records through both prunes.
        let seen: BTreeSet<String> = eligible.iter().map(|s| s.callsign_key()).collect();
        metrics.evicted += store.prune(&self.retention, &seen, now).len();

        let mut live = Vec::with_capacity(eligible.len());
        for state in eligible {
            let callsign = state.callsign_key();
            let record = self.observe(state, store.get(&callsign), now);
            live.push(self.live_entry(state, &callsign, &record));
            store.upsert(&callsign, record);
            metrics.records_written += 1;
        }

        let departed: Vec<String> = store
            .records()
            .iter()
            .filter(|(callsign, record)| {
                record.status == Status::Active && !seen.contains(callsign.as_str())
            })
            .map(|(callsign, _)| callsign.clone())
            .collect();
        for callsign in departed {
            if let Some(mut record) = store.get(&callsign).cloned() {
                record.status = Status::Past;
                debug!(callsign = %callsign, "Aircraft left the monitored area");
                store.upsert(&callsign, record);
                metrics.marked_past += 1;
            }
        }

        metrics.evicted += store.prune(&self.retention, &seen, now).len();

        let entries = self.assemble(live, store);
        metrics.displayed = entries.len();
        Reconciliation { entries, metrics }
    }

    /// Build a display list from stored Past records alone.
    ///
    /// Used when no snapshot is available. Nothing is written.
    #[must_use]
    pub fn fallback_entries(&self, store: &ContactStore, now: DateTime<Utc>) -> Vec<DisplayEntry> {
        store
            .past_records()
            .into_iter()
            .filter(|(_, record)| !self.retention.is_expired(record, now))
            .take(self.max_display)
            .map(|(callsign, record)| self.placeholder(callsign, record))
            .collect()
    }

    /// The record for `state` after this observation.
    fn observe(
        &self,
        state: &StateVector,
        existing: Option<&ContactRecord>,
        now: DateTime<Utc>,
    ) -> ContactRecord {
        let status = state.status();
        let heading = heading_of(state);

        let Some(existing) = existing else {
            return ContactRecord::new(now, status, heading);
        };

        let mut record = existing.clone();
        if status == Status::Active && record.direction.is_none() {
            record.direction = heading;
        }
        record.status = status;
        record.last_seen = Some(now);
        if status == Status::Active {
            record.last_active = Some(now);
        }
        record
    }

    fn live_entry(&self, state: &StateVector, callsign: &str, record: &ContactRecord) -> DisplayEntry {
        let status = state.status();
        DisplayEntry {
            time: time_of_day(record.first_time),
            callsign: self.airlines.resolve(state.callsign.as_deref().unwrap_or_default()),
            code: callsign.to_string(),
            direction: self.direction_label(heading_of(state).or(record.direction)),
            status: status.label(self.language).to_string(),
            altitude: state.baro_altitude.unwrap_or(0.0),
            speed: state.velocity.unwrap_or(0.0),
            distance: round_distance(self.geo.distance_km(state).unwrap_or(0.0)),
            state: status,
            first_seen: record.first_time,
            live: true,
        }
    }

    fn placeholder(&self, callsign: &str, record: &ContactRecord) -> DisplayEntry {
        DisplayEntry {
            time: time_of_day(record.first_time),
            callsign: self.airlines.resolve(callsign),
            code: callsign.to_string(),
            direction: self.direction_label(record.direction),
            status: Status::Past.label(self.language).to_string(),
            altitude: 0.0,
            speed: 0.0,
            distance: 0.0,
            state: Status::Past,
            first_seen: record.first_time,
            live: false,
        }
    }

    fn direction_label(&self, direction: Option<Compass>) -> String {
        direction
            .map_or(NO_DIRECTION, |d| d.label(self.language))
            .to_string()
    }

    fn assemble(&self, live: Vec<DisplayEntry>, store: &ContactStore) -> Vec<DisplayEntry> {
        let mut by_callsign: BTreeMap<String, DisplayEntry> = BTreeMap::new();
        for entry in live {
            match by_callsign.get(&entry.code) {
                Some(kept) if rank(kept) >= rank(&entry) => {}
                _ => {
                    by_callsign.insert(entry.code.clone(), entry);
                }
            }
        }
        for (callsign, record) in store.past_records() {
            if !by_callsign.contains_key(callsign) {
                by_callsign.insert(callsign.clone(), self.placeholder(callsign, record));
            }
        }

        let mut entries: Vec<DisplayEntry> = by_callsign.into_values().collect();
        sort_entries(&mut entries);
        entries.truncate(self.max_display);
        entries
    }
}

fn heading_of(state: &StateVector) -> Option<Compass> {
    state.true_track.and_then(Compass::from_degrees)
}

/// Preference when two entries share a callsign: Active over Past, then
/// live telemetry over a placeholder.
fn rank(entry: &DisplayEntry) -> (bool, bool) {
    (entry.is_active(), entry.live)
}

/// Active before Past, then newest first, then by callsign.
pub fn sort_entries(entries: &mut [DisplayEntry]) {
    entries.sort_by(|a, b| {
        b.is_active()
            .cmp(&a.is_active())
            .then_with(|| b.first_seen.cmp(&a.first_seen))
            .then_with(|| a.code.cmp(&b.code))
    });
}
