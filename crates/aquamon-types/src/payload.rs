//! Decoding of sensor payloads.
//!
//! The ESP32 firmware speaks JSON with Portuguese field names, both in HTTP
//! response bodies and in BLE notifications:
//!
//! ```json
//! { "turbidez": 45.2, "temperatura": 26.1, "ph": 7.1, "nivel": "limpa" }
//! ```
//!
//! BLE firmware may also notify a bare number (turbidity only). Decoding
//! returns a [`ParseResult`] instead of best-effort casting: a payload is
//! either a complete [`SensorReading`] or a [`ParseError`].

use serde_json::{Map, Value};

use crate::error::{ParseError, ParseResult};
use crate::types::SensorReading;

/// Wire field names used by the firmware.
pub mod field {
    /// Turbidity (required).
    pub const TURBIDITY: &str = "turbidez";
    /// Water temperature.
    pub const TEMPERATURE: &str = "temperatura";
    /// pH.
    pub const PH: &str = "ph";
    /// Dissolved oxygen.
    pub const DISSOLVED_OXYGEN: &str = "oxigenio";
    /// Ammonia.
    pub const AMMONIA: &str = "amonia";
    /// Battery level.
    pub const BATTERY: &str = "bateria";
    /// Device connectivity flag.
    pub const CONNECTED: &str = "conectado";
    /// Qualitative level label.
    pub const LEVEL: &str = "nivel";
    /// Device-side timestamp.
    pub const TIMESTAMP: &str = "timestamp";
    /// Envelope used by the demo endpoint.
    pub const DATA: &str = "data";
}

/// How a BLE notification was decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A JSON reading object.
    Json(SensorReading),
    /// A bare number, taken as turbidity.
    Number(SensorReading),
}

impl Notification {
    /// The decoded reading regardless of format.
    pub fn into_reading(self) -> SensorReading {
        match self {
            Notification::Json(r) | Notification::Number(r) => r,
        }
    }
}

/// Decode an HTTP response body into a reading.
///
/// The body must be a JSON object with a numeric `turbidez` field, either at
/// the top level or inside a `data` envelope (the demo endpoint's shape).
/// `received_at` stamps the reading; device timestamps are ignored because
/// the firmware counts from boot.
pub fn parse_http_body(body: &[u8], received_at: i64) -> ParseResult<SensorReading> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    reading_from_value(&value, received_at)
}

/// Decode a BLE notification.
///
/// The payload is UTF-8 text. JSON objects are decoded like HTTP bodies
/// (except that a positive epoch `timestamp` in the payload is honoured);
/// otherwise the text is parsed as a plain number.
pub fn parse_notification(payload: &[u8], received_at: i64) -> ParseResult<Notification> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8)?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => {
            let mut reading = reading_from_object(&map, received_at)?;
            if let Some(ts) = map.get(field::TIMESTAMP).and_then(Value::as_i64)
                && ts > 0
            {
                reading.timestamp = ts;
            }
            Ok(Notification::Json(reading))
        }
        Ok(Value::Number(n)) => n
            .as_f64()
            .map(|v| Notification::Number(SensorReading::new(v, received_at)))
            .ok_or_else(|| ParseError::Unrecognized(text.to_string())),
        _ => parse_number(text)
            .map(|v| Notification::Number(SensorReading::new(v, received_at)))
            .ok_or_else(|| ParseError::Unrecognized(text.to_string())),
    }
}

/// Encode a reading in the firmware's wire format.
pub fn to_wire(reading: &SensorReading) -> Value {
    let mut map = Map::new();
    map.insert(field::TURBIDITY.into(), reading.turbidity.into());
    let optional = [
        (field::TEMPERATURE, reading.temperature),
        (field::PH, reading.ph),
        (field::DISSOLVED_OXYGEN, reading.dissolved_oxygen),
        (field::AMMONIA, reading.ammonia),
    ];
    for (name, value) in optional {
        if let Some(v) = value {
            map.insert(name.into(), v.into());
        }
    }
    if let Some(b) = reading.battery {
        map.insert(field::BATTERY.into(), b.into());
    }
    if let Some(c) = reading.connected {
        map.insert(field::CONNECTED.into(), c.into());
    }
    if let Some(level) = &reading.level {
        map.insert(field::LEVEL.into(), level.clone().into());
    }
    map.insert(field::TIMESTAMP.into(), reading.timestamp.into());
    Value::Object(map)
}

fn reading_from_value(value: &Value, received_at: i64) -> ParseResult<SensorReading> {
    let map = value
        .as_object()
        .ok_or_else(|| ParseError::InvalidData("expected a JSON object".to_string()))?;

    if !map.contains_key(field::TURBIDITY)
        && let Some(Value::Object(inner)) = map.get(field::DATA)
    {
        return reading_from_object(inner, received_at);
    }
    reading_from_object(map, received_at)
}

fn reading_from_object(map: &Map<String, Value>, received_at: i64) -> ParseResult<SensorReading> {
    let turbidity = match map.get(field::TURBIDITY) {
        None | Some(Value::Null) => return Err(ParseError::MissingField(field::TURBIDITY)),
        Some(_) => number(map, field::TURBIDITY).ok_or_else(|| {
            ParseError::InvalidData(format!("'{}' is not a number", field::TURBIDITY))
        })?,
    };

    Ok(SensorReading {
        turbidity,
        temperature: number(map, field::TEMPERATURE),
        ph: number(map, field::PH),
        dissolved_oxygen: number(map, field::DISSOLVED_OXYGEN),
        ammonia: number(map, field::AMMONIA),
        battery: number(map, field::BATTERY).map(|b| b.clamp(0.0, 100.0).round() as u8),
        connected: map.get(field::CONNECTED).and_then(Value::as_bool),
        level: map
            .get(field::LEVEL)
            .and_then(Value::as_str)
            .map(str::to_string),
        timestamp: received_at,
    })
}

/// Numeric field. Quoted numbers are not numbers.
fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key)?.as_f64().filter(|v| v.is_finite())
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
