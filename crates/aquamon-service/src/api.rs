//! REST API endpoints for aquamon-service.
//!
//! The readings API is the upload target of the client's sync reconciler:
//! every manual reading logged offline is eventually `POST`ed here once.
//! Uploads are idempotent on the reading id (also sent as the
//! `Idempotency-Key` header), so a retried upload is acknowledged without
//! storing a second copy.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store errors
//! are converted automatically and return HTTP 500.
//!
//! # Example
//!
//! ```ignore
//! use aquamon_service::{AppState, Config, api};
//!
//! let app = api::app(AppState::new(store, Config::default()));
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use aquamon_types::SavedReading;

use crate::state::{AppState, ReadingEvent};
use crate::{demo, relay, ws};

/// Store key holding every accepted reading.
pub const RECEIVED_READINGS: &str = "received-readings";

/// Header carrying the upload idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Maximum number of readings returned by one query.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Create the API router (health and readings).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/readings", get(list_readings).post(create_reading))
}

/// Assemble the full application: API, relay, WebSocket stream and, when
/// enabled, the simulated sensor, with tracing and permissive CORS.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .merge(router())
        .merge(relay::router())
        .merge(ws::router());
    if state.config.demo.enabled {
        router = router.merge(demo::router());
    }
    router
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Acknowledgement of an upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Id the reading is stored under.
    pub id: String,
    /// Whether the id had already been accepted.
    pub duplicate: bool,
}

async fn create_reading(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut reading): Json<SavedReading>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(key) = headers.get(IDEMPOTENCY_HEADER) {
        let key = key
            .to_str()
            .map_err(|_| AppError::BadRequest("idempotency key is not valid text".to_string()))?;
        if reading.id.is_empty() {
            reading.id = key.to_string();
        } else if reading.id != key {
            return Err(AppError::BadRequest(format!(
                "idempotency key '{}' does not match reading id '{}'",
                key, reading.id
            )));
        }
    }
    if reading.id.trim().is_empty() {
        return Err(AppError::BadRequest("reading id is required".to_string()));
    }
    if !reading.reading.turbidity.is_finite() || reading.reading.turbidity < 0.0 {
        return Err(AppError::BadRequest(format!(
            "turbidity must be a non-negative number, got {}",
            reading.reading.turbidity
        )));
    }

    reading.synced = true;
    let id = reading.id.clone();
    let inserted = {
        let store = state.store.lock().await;
        store.update(RECEIVED_READINGS, |all: &mut Vec<SavedReading>| {
            if all.iter().any(|r| r.id == reading.id) {
                false
            } else {
                all.push(reading.clone());
                true
            }
        })?
    };

    if !inserted {
        debug!(%id, "Ignoring repeated upload");
        return Ok((
            StatusCode::OK,
            Json(UploadResponse {
                id,
                duplicate: true,
            }),
        ));
    }

    info!(%id, turbidity = reading.reading.turbidity, tank = ?reading.tank, "Accepted reading");
    // No subscribers is fine
    let _ = state.readings_tx.send(ReadingEvent {
        reading,
        received_at: OffsetDateTime::now_utc(),
    });
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id,
            duplicate: false,
        }),
    ))
}

/// Query parameters for listing readings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReadingsQuery {
    /// Only readings logged for this tank (case-insensitive).
    pub tank: Option<String>,
    /// Only readings taken at or after this epoch-millisecond instant.
    pub since: Option<i64>,
    /// Return at most this many of the most recent matches.
    pub limit: Option<usize>,
}

impl ReadingsQuery {
    /// Validate query parameters.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(limit) = self.limit
            && (limit == 0 || limit > MAX_QUERY_LIMIT)
        {
            return Err(AppError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_QUERY_LIMIT
            )));
        }
        Ok(())
    }

    fn matches(&self, reading: &SavedReading) -> bool {
        let tank_ok = match (&self.tank, &reading.tank) {
            (None, _) => true,
            (Some(wanted), Some(tank)) => tank.eq_ignore_ascii_case(wanted),
            (Some(_), None) => false,
        };
        tank_ok && self.since.is_none_or(|since| reading.reading.timestamp >= since)
    }
}

/// Response for reading queries.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingsResponse {
    pub count: usize,
    pub data: Vec<SavedReading>,
}

async fn list_readings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadingsQuery>,
) -> Result<Json<ReadingsResponse>, AppError> {
    query.validate()?;
    let all: Vec<SavedReading> = state
        .store
        .lock()
        .await
        .load_or_default(RECEIVED_READINGS)?;

    let mut data: Vec<SavedReading> = all.into_iter().filter(|r| query.matches(r)).collect();
    if let Some(limit) = query.limit
        && data.len() > limit
    {
        data.drain(..data.len() - limit);
    }
    Ok(Json(ReadingsResponse {
        count: data.len(),
        data,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    Timeout(String),
    BadGateway(String),
    Store(aquamon_store::Error),
    Internal(String),
}

impl From<aquamon_store::Error> for AppError {
    fn from(e: aquamon_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Timeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
