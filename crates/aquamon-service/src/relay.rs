//! Same-origin relay to sensors on the local network.
//!
//! Clients that cannot reach an ESP32 directly send
//! `GET /api/esp32/proxy?url=<target>` (or `POST` with a JSON body) and the
//! service forwards the request. Only private-network and loopback targets
//! are relayed, so the endpoint cannot be used to reach arbitrary hosts.
//!
//! Upstream status codes and bodies are passed through unchanged, including
//! redirects, which are never followed by the relay itself. An
//! upstream that does not answer within `relay.timeout_secs` yields `408`;
//! any other upstream failure yields `502`.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{Method, header},
    response::Response,
    routing::get,
};
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::AppError;
use crate::state::AppState;

/// Route the relay is mounted on.
pub const PROXY_PATH: &str = "/api/esp32/proxy";

/// Create the relay router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(PROXY_PATH, get(proxy_get).post(proxy_post))
}

/// Query parameters of the relay endpoint.
#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    /// Absolute URL of the device resource.
    pub url: Option<String>,
}

/// Whether `host` names a private-network or loopback address.
///
/// Accepts `localhost`, `127.0.0.0/8` and `::1` when `allow_loopback` is
/// set, and always accepts `10.0.0.0/8`, `172.16.0.0/12` and
/// `192.168.0.0/16`. Other names are rejected without resolving them.
pub fn is_private_host(host: &str, allow_loopback: bool) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return allow_loopback;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) if ip.is_loopback() => allow_loopback,
        Ok(IpAddr::V4(ip)) => ip.is_private(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback() && allow_loopback,
        Err(_) => false,
    }
}

/// Parse and vet a relay target.
pub fn validate_target(raw: Option<&str>, allow_loopback: bool) -> Result<Url, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing 'url' query parameter".to_string()))?;
    let url = Url::parse(raw)
        .map_err(|e| AppError::BadRequest(format!("invalid target URL '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest(format!(
            "unsupported scheme '{}': only http and https are relayed",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| AppError::BadRequest(format!("target URL '{}' has no host", raw)))?;
    if !is_private_host(host, allow_loopback) {
        warn!(%host, "Refusing to relay to non-local host");
        return Err(AppError::Forbidden(
            "only local network addresses may be relayed".to_string(),
        ));
    }
    Ok(url)
}

async fn proxy_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, AppError> {
    let target = validate_target(query.url.as_deref(), state.config.relay.allow_localhost)?;
    forward(&state, Method::GET, target, None).await
}

async fn proxy_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    let target = validate_target(query.url.as_deref(), state.config.relay.allow_localhost)?;
    forward(&state, Method::POST, target, Some(body)).await
}

async fn forward(
    state: &AppState,
    method: Method,
    target: Url,
    body: Option<serde_json::Value>,
) -> Result<Response, AppError> {
    let timeout = state.config.relay.timeout();
    info!(%method, %target, "Relaying request");

    let client = state
        .client
        .as_ref()
        .ok_or_else(|| AppError::Internal("relay client unavailable".to_string()))?;
    let mut request = client.request(method, target.clone()).timeout(timeout);
    if let Some(body) = &body {
        request = request.json(body);
    }

    let upstream = request.send().await.map_err(|e| upstream_error(&target, e))?;
    let status = upstream.status();
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let location = upstream.headers().get(header::LOCATION).cloned();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| upstream_error(&target, e))?;
    debug!(%target, status = status.as_u16(), len = bytes.len(), "Upstream answered");

    let mut response = Response::builder().status(status);
    if let Some(content_type) = content_type {
        response = response.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(location) = location {
        response = response.header(header::LOCATION, location);
    }
    response
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn upstream_error(target: &Url, error: reqwest::Error) -> AppError {
    if error.is_timeout() {
        warn!(%target, "Upstream timed out");
        AppError::Timeout(format!("device at {} did not respond in time", target))
    } else {
        warn!(%target, "Upstream request failed: {}", error);
        AppError::BadGateway(format!("could not reach device at {}: {}", target, error))
    }
}
