//! Simulated turbidity sensor.
//!
//! `GET /api/turbidez` answers like an ESP32 with an analog turbidity probe,
//! after a random delay. `POST /api/turbidez` echoes the JSON body back with
//! `201 Created`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::state::AppState;

/// Route the simulated sensor is mounted on.
pub const DEMO_PATH: &str = "/api/turbidez";

/// Probe output range in volts.
const MIN_VOLTAGE: f64 = 2.5;
const MAX_VOLTAGE: f64 = 4.2;

/// Create the demo router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(DEMO_PATH, get(read_sensor).post(echo))
}

/// Response of the simulated sensor.
#[derive(Debug, Serialize)]
pub struct DemoResponse {
    pub success: bool,
    pub data: DemoData,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Simulated probe values, named as the firmware names them.
#[derive(Debug, Serialize)]
pub struct DemoData {
    /// Probe voltage.
    pub voltagem: f64,
    /// Turbidity in NTU.
    pub turbidez: f64,
    /// Coarse clarity level.
    pub nivel: &'static str,
}

impl DemoData {
    /// Values for a probe reading `voltage` volts.
    pub fn from_voltage(voltage: f64) -> Self {
        let turbidez = round2(turbidity_from_voltage(voltage));
        Self {
            voltagem: round2(voltage),
            turbidez,
            nivel: clarity_level(turbidez),
        }
    }
}

/// Convert probe voltage to NTU with the usual quadratic calibration curve
/// of analog turbidity probes. Clamped at zero above ~4.2 V.
pub fn turbidity_from_voltage(voltage: f64) -> f64 {
    let ntu = -1120.4 * voltage * voltage + 5742.3 * voltage - 4352.9;
    ntu.max(0.0)
}

/// Coarse label for a turbidity value.
pub fn clarity_level(ntu: f64) -> &'static str {
    match ntu {
        n if n < 50.0 => "limpa",
        n if n < 500.0 => "moderada",
        _ => "turva",
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn read_sensor(State(state): State<Arc<AppState>>) -> Json<DemoResponse> {
    let demo = &state.config.demo;
    let (latency, voltage) = {
        let mut rng = rand::rng();
        let latency = if demo.max_latency_ms > demo.min_latency_ms {
            rng.random_range(demo.min_latency_ms..=demo.max_latency_ms)
        } else {
            demo.min_latency_ms
        };
        (latency, rng.random_range(MIN_VOLTAGE..=MAX_VOLTAGE))
    };
    tokio::time::sleep(Duration::from_millis(latency)).await;

    let data = DemoData::from_voltage(voltage);
    debug!(latency_ms = latency, ntu = data.turbidez, "Serving simulated reading");
    Json(DemoResponse {
        success: true,
        data,
        timestamp: OffsetDateTime::now_utc(),
    })
}

async fn echo(Json(body): Json<serde_json::Value>) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::CREATED, Json(body))
}
