//! Poll orchestration: rate gate, token, fetch, reconcile, cache.
//!
//! The [`PollOrchestrator`] drives one cycle per [`PollOrchestrator::poll_once`]
//! call and never schedules itself. The contact store sits behind a single
//! async mutex that is held for the whole fetch, reconcile and persist
//! scope, so concurrent callers are serialized and the one-record-per-callsign
//! invariant holds. The display cache is swapped as a whole and read without
//! touching that mutex.
//!
//! No failure escapes a cycle. In the worst case the caller gets a stale or
//! empty list.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aircraft::DisplayEntry;
use crate::airline::AirlineResolver;
use crate::config::Config;
use crate::engine::{CycleMetrics, ReconciliationEngine};
use crate::error::Result;
use crate::storage::{open_backend, BackendKind, ContactStore};
use crate::upstream::{CredentialSource, FeedError, OpenSkyClient, StateFeed, TokenBroker};

/// Default minimum time between upstream requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(6);

/// Default lifetime of a cached display list.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Poll cadence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Minimum time between upstream requests.
    pub min_interval: Duration,
    /// How long a reconciled list is served without polling again.
    pub cache_ttl: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Where a display list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollSource {
    /// Reconciled from a fresh snapshot.
    Live,
    /// The cached result of an earlier cycle.
    Cached,
    /// Built from stored Past records.
    Fallback,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollOutcome {
    /// The display list.
    pub aircraft: Vec<DisplayEntry>,
    /// Where the list came from.
    pub source: PollSource,
    /// Reconciliation counts, for live cycles only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CycleMetrics>,
}

/// Cumulative counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollCounters {
    /// Cycles that passed the rate gate.
    pub polls: u64,
    /// Cycles that reconciled a fresh snapshot.
    pub live_fetches: u64,
    /// Cycles answered from stored Past records.
    pub fallbacks: u64,
    /// Upstream 429 responses.
    pub rate_limited: u64,
    /// Calls turned away by the rate gate.
    pub gate_hits: u64,
}

/// Snapshot of the orchestrator's internal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Cumulative counters.
    pub counters: PollCounters,
    /// Backend writes that failed.
    pub persistence_failures: u64,
    /// Counts from the last live cycle.
    pub last_metrics: Option<CycleMetrics>,
    /// When the upstream was last contacted.
    pub last_request_time: Option<DateTime<Utc>>,
    /// Whether a fresh display list is cached.
    pub aircraft_cached: bool,
    /// Whether a valid token is cached.
    pub token_cached: bool,
    /// Whether client credentials are configured.
    pub has_credentials: bool,
    /// Which backend persists contacts.
    pub backend: BackendKind,
    /// Number of tracked callsigns.
    pub contacts: usize,
}

#[derive(Debug, Clone)]
struct CachedList {
    entries: Vec<DisplayEntry>,
    stored_at: Instant,
}

/// State only touched while a cycle holds the lock.
#[derive(Debug)]
struct CycleState {
    store: ContactStore,
    last_request: Option<Instant>,
    last_request_time: Option<DateTime<Utc>>,
    last_metrics: Option<CycleMetrics>,
    counters: PollCounters,
}

/// Drives poll cycles against the upstream feed.
pub struct PollOrchestrator {
    engine: ReconciliationEngine,
    credentials: Arc<dyn CredentialSource>,
    feed: Arc<dyn StateFeed>,
    settings: PollSettings,
    cycle: Mutex<CycleState>,
    cache: RwLock<Option<CachedList>>,
}

impl std::fmt::Debug for PollOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollOrchestrator")
            .field("engine", &self.engine)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PollOrchestrator {
    /// Create an orchestrator owning the contact store.
    #[must_use]
    pub fn new(
        engine: ReconciliationEngine,
        store: ContactStore,
        credentials: Arc<dyn CredentialSource>,
        feed: Arc<dyn StateFeed>,
        settings: PollSettings,
    ) -> Self {
        Self {
            engine,
            credentials,
            feed,
            settings,
            cycle: Mutex::new(CycleState {
                store,
                last_request: None,
                last_request_time: None,
                last_metrics: None,
                counters: PollCounters::default(),
            }),
            cache: RwLock::new(None),
        }
    }

    /// Wire the store, token broker and OpenSky client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be opened or an HTTP
    /// client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let airlines = AirlineResolver::load(&config.airlines, config.airlines_path.as_deref());
        let backend = open_backend(config.storage.backend, config.storage_path())?;
        let store = ContactStore::open(backend);
        info!(
            backend = %store.backend_kind(),
            contacts = store.len(),
            airlines = airlines.len(),
            "Contact store opened"
        );

        Ok(Self::new(
            ReconciliationEngine::from_config(config, airlines),
            store,
            Arc::new(TokenBroker::from_config(config)?),
            Arc::new(OpenSkyClient::from_config(config)?),
            config.poll_settings(),
        ))
    }

    /// The reconciliation engine.
    #[must_use]
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Run one poll cycle.
    pub async fn poll_once(&self) -> PollOutcome {
        let mut cycle = self.cycle.lock().await;
        let started = Instant::now();

        if let Some(last) = cycle.last_request {
            if started.duration_since(last) < self.settings.min_interval {
                cycle.counters.gate_hits += 1;
                debug!("Rate gate: upstream contacted too recently");
                let last = self.last_cache().await;
                return self.cached_or_fallback(&mut cycle, last);
            }
        }
        cycle.last_request = Some(started);
        cycle.last_request_time = Some(Utc::now());
        cycle.counters.polls += 1;

        let Some(token) = self.credentials.get_token(false).await else {
            warn!("No access token available, serving stored contacts");
            return self.fallback(&mut cycle);
        };

        let states = match self.feed.fetch_states(&token).await {
            Ok(states) => states,
            Err(e) if e.is_retriable_with_fresh_token() => {
                warn!("Upstream rejected the access token, refreshing once");
                let Some(fresh) = self.credentials.get_token(true).await else {
                    warn!("Token refresh failed, serving stored contacts");
                    return self.fallback(&mut cycle);
                };
                match self.feed.fetch_states(&fresh).await {
                    Ok(states) => states,
                    Err(e) => return self.recover(&mut cycle, &e).await,
                }
            }
            Err(e) => return self.recover(&mut cycle, &e).await,
        };

        if states.is_empty() {
            warn!("Upstream returned no state vectors, serving stored contacts");
            return self.fallback(&mut cycle);
        }

        let now = Utc::now().trunc_subsecs(3);
        let result = self.engine.reconcile(&states, &mut cycle.store, now);
        let metrics = result.metrics;
        info!(
            total = metrics.total_states,
            in_radius = metrics.in_radius,
            filtered_by_category = metrics.filtered_by_category,
            written = metrics.records_written,
            marked_past = metrics.marked_past,
            evicted = metrics.evicted,
            displayed = metrics.displayed,
            "Poll cycle complete"
        );

        cycle.counters.live_fetches += 1;
        cycle.last_metrics = Some(metrics);
        *self.cache.write().await = Some(CachedList {
            entries: result.entries.clone(),
            stored_at: Instant::now(),
        });

        PollOutcome {
            aircraft: result.entries,
            source: PollSource::Live,
            metrics: Some(metrics),
        }
    }

    /// The current display list, polling only when nothing fresh is cached.
    pub async fn aircraft(&self) -> Vec<DisplayEntry> {
        if let Some(entries) = self.fresh_cache().await {
            return entries;
        }
        self.poll_once().await.aircraft
    }

    /// Counters, cache and token state.
    pub async fn diagnostics(&self) -> Diagnostics {
        let aircraft_cached = self.fresh_cache().await.is_some();
        let token_cached = self.credentials.has_cached_token().await;
        let cycle = self.cycle.lock().await;
        Diagnostics {
            timestamp: Utc::now(),
            counters: cycle.counters,
            persistence_failures: cycle.store.write_failures(),
            last_metrics: cycle.last_metrics,
            last_request_time: cycle.last_request_time,
            aircraft_cached,
            token_cached,
            has_credentials: self.credentials.has_credentials(),
            backend: cycle.store.backend_kind(),
            contacts: cycle.store.len(),
        }
    }

    /// Apply the retention policy outside a poll cycle. Returns the evicted
    /// callsigns.
    pub async fn prune(&self) -> Vec<String> {
        let mut cycle = self.cycle.lock().await;
        cycle
            .store
            .prune(self.engine.retention(), &BTreeSet::new(), Utc::now())
    }

    /// The most recent live list, however old.
    async fn last_cache(&self) -> Option<Vec<DisplayEntry>> {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|cached| cached.entries.clone())
    }

    async fn fresh_cache(&self) -> Option<Vec<DisplayEntry>> {
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.stored_at.elapsed() < self.settings.cache_ttl)
            .map(|cached| cached.entries.clone())
    }

    async fn recover(&self, cycle: &mut CycleState, error: &FeedError) -> PollOutcome {
        if error.is_rate_limited() {
            cycle.counters.rate_limited += 1;
            warn!("Upstream rate limit reached, serving cached list");
        } else {
            warn!("Upstream unavailable: {error}");
        }
        let fresh = self.fresh_cache().await;
        self.cached_or_fallback(cycle, fresh)
    }

    fn cached_or_fallback(
        &self,
        cycle: &mut CycleState,
        cached: Option<Vec<DisplayEntry>>,
    ) -> PollOutcome {
        match cached {
            Some(entries) => PollOutcome {
                aircraft: entries,
                source: PollSource::Cached,
                metrics: None,
            },
            None => self.fallback(cycle),
        }
    }

    fn fallback(&self, cycle: &mut CycleState) -> PollOutcome {
        cycle.counters.fallbacks += 1;
        let aircraft = self
            .engine
            .fallback_entries(&cycle.store, Utc::now().trunc_subsecs(3));
        debug!(count = aircraft.len(), "Built fallback list from stored contacts");
        PollOutcome {
            aircraft,
            source: PollSource::Fallback,
            metrics: None,
        }
    }
}
