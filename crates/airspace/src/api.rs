//! HTTP surface for display clients and operators.
//!
//! ## Endpoints
//!
//! - `GET /api/aircraft` - Current display list with site metadata
//! - `GET|POST /api/poll` - Force one poll cycle (shared secret, if configured)
//! - `GET /api/config` - Site title, center and radius
//! - `GET /api/debug` - Counters, cache and token state

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aircraft::DisplayEntry;
use crate::config::Config;
use crate::error::Result;
use crate::poller::{PollOrchestrator, PollOutcome};

/// Header carrying the poll secret.
pub const POLL_SECRET_HEADER: &str = "x-poll-secret";

/// Center of the monitored area as sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
}

/// Public description of the monitored site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteInfo {
    /// Display title.
    pub title: String,
    /// Monitored center.
    pub coordinates: Coordinates,
    /// Monitored radius in kilometers.
    pub radius: f64,
}

impl SiteInfo {
    /// Site description from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            title: config.display.title.clone(),
            coordinates: Coordinates {
                lat: config.monitoring.lat,
                lon: config.monitoring.lon,
            },
            radius: config.monitoring.radius_km,
        }
    }
}

/// Shared state for all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    poller: Arc<PollOrchestrator>,
    site: Arc<SiteInfo>,
    poll_secret: Option<Arc<str>>,
}

impl AppState {
    /// Create handler state. An empty secret counts as none.
    #[must_use]
    pub fn new(poller: Arc<PollOrchestrator>, site: SiteInfo, poll_secret: Option<String>) -> Self {
        Self {
            poller,
            site: Arc::new(site),
            poll_secret: poll_secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }

    fn authorized(&self, query: &PollQuery, headers: &HeaderMap) -> bool {
        let Some(secret) = self.poll_secret.as_deref() else {
            return true;
        };
        let header = headers
            .get(POLL_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        query.token.as_deref() == Some(secret) || header == Some(secret)
    }
}

/// Body of `GET /api/aircraft`.
#[derive(Debug, Serialize)]
pub struct AircraftResponse {
    /// Display title.
    pub title: String,
    /// The display list.
    pub aircraft: Vec<DisplayEntry>,
    /// Response time.
    pub timestamp: DateTime<Utc>,
    /// Monitored center.
    pub coordinates: Coordinates,
    /// Monitored radius in kilometers.
    pub radius: f64,
}

/// Body of `/api/poll`.
#[derive(Debug, Serialize)]
pub struct PollResponse {
    /// Cycle result.
    #[serde(flatten)]
    pub outcome: PollOutcome,
    /// Response time.
    pub timestamp: DateTime<Utc>,
}

/// Query parameters of `/api/poll`.
#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    /// Poll secret.
    pub token: Option<String>,
}

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or wrong poll secret.
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "unauthorized" })),
            )
                .into_response(),
        }
    }
}

/// Create the router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/aircraft", get(aircraft))
        .route("/api/poll", get(poll).post(poll))
        .route("/api/config", get(site_config))
        .route("/api/debug", get(debug_info))
        .with_state(state)
}

async fn aircraft(State(state): State<AppState>) -> Json<AircraftResponse> {
    let aircraft = state.poller.aircraft().await;
    Json(AircraftResponse {
        title: state.site.title.clone(),
        aircraft,
        timestamp: Utc::now(),
        coordinates: state.site.coordinates,
        radius: state.site.radius,
    })
}

async fn poll(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> std::result::Result<Json<PollResponse>, ApiError> {
    if !state.authorized(&query, &headers) {
        warn!("Rejected poll request with missing or wrong secret");
        return Err(ApiError::Unauthorized);
    }
    let outcome = state.poller.poll_once().await;
    Ok(Json(PollResponse {
        outcome,
        timestamp: Utc::now(),
    }))
}

async fn site_config(State(state): State<AppState>) -> Json<SiteInfo> {
    Json(state.site.as_ref().clone())
}

async fn debug_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.poller.diagnostics().await)
}

/// Serve the router until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::aircraft::{Language, StateVector, Status};
    use crate::airline::AirlineResolver;
    use crate::engine::ReconciliationEngine;
    use crate::geo::{Center, GeoFilter};
    use crate::poller::PollSettings;
    use crate::storage::{ContactRecord, ContactStore, RetentionPolicy, SqliteBackend};
    use crate::upstream::{CredentialSource, FeedResult, StateFeed};

    #[derive(Debug)]
    struct StaticCredentials;

    #[async_trait::async_trait]
    impl CredentialSource for StaticCredentials {
        async fn get_token(&self, _force_refresh: bool) -> Option<String> {
            Some("tok".to_string())
        }

        fn has_credentials(&self) -> bool {
            true
        }

        async fn has_cached_token(&self) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct OnePlane;

    #[async_trait::async_trait]
    impl StateFeed for OnePlane {
        async fn fetch_states(&self, _token: &str) -> FeedResult<Vec<StateVector>> {
            Ok(vec![StateVector {
                callsign: Some("DLH4AB".to_string()),
                latitude: Some(48.40),
                longitude: Some(7.90),
                baro_altitude: Some(1000.0),
                category: Some(3),
                ..StateVector::default()
            }])
        }
    }

    fn app(secret: Option<&str>) -> Router {
        let center = Center {
            lat: 48.3705,
            lon: 7.8819,
        };
        let engine = ReconciliationEngine::new(
            GeoFilter::new(center, 10.0, [3]),
            AirlineResolver::new([("DLH".to_string(), "Lufthansa".to_string())]),
            RetentionPolicy::default(),
            7,
            Language::De,
        );
        let mut store = ContactStore::open(Box::new(SqliteBackend::open_in_memory().unwrap()));
        store.upsert("OLD1", ContactRecord::new(Utc::now(), Status::Past, None));
        let poller = PollOrchestrator::new(
            engine,
            store,
            Arc::new(StaticCredentials),
            Arc::new(OnePlane),
            PollSettings::default(),
        );
        let site = SiteInfo {
            title: "Test".to_string(),
            coordinates: Coordinates {
                lat: center.lat,
                lon: center.lon,
            },
            radius: 10.0,
        };
        create_router(AppState::new(
            Arc::new(poller),
            site,
            secret.map(str::to_string),
        ))
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_aircraft_endpoint() {
        let (status, body) = call(app(None), get("/api/aircraft")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Test");
        assert_eq!(body["radius"], 10.0);
        let aircraft = body["aircraft"].as_array().unwrap();
        assert_eq!(aircraft.len(), 2);
        assert_eq!(aircraft[0]["callsign"], "Lufthansa");
        assert_eq!(aircraft[0]["status"], "Im Luftraum");
        assert_eq!(aircraft[1]["code"], "OLD1");
    }

    #[tokio::test]
    async fn test_config_endpoint() {
        let (status, body) = call(app(None), get("/api/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coordinates"]["lat"], 48.3705);
        assert!(body.get("poll_secret").is_none());
    }

    #[tokio::test]
    async fn test_poll_without_secret_configured() {
        let (status, body) = call(app(None), get("/api/poll")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "live");
        assert_eq!(body["metrics"]["eligible"], 1);
    }

    #[tokio::test]
    async fn test_poll_rejects_wrong_secret() {
        let (status, body) = call(app(Some("cron")), get("/api/poll")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = call(app(Some("cron")), get("/api/poll?token=CRON")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_poll_accepts_query_or_header_secret() {
        let (status, _) = call(app(Some("cron")), get("/api/poll?token=cron")).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder()
            .method("POST")
            .uri("/api/poll")
            .header(POLL_SECRET_HEADER, "cron")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(app(Some("cron")), request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_debug_endpoint() {
        let (status, body) = call(app(None), get("/api/debug")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hasCredentials"], true);
        assert_eq!(body["backend"], "sqlite");
        assert_eq!(body["contacts"], 1);
    }
}
