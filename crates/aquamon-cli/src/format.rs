//! Output formatting for readings, tanks and device settings.

use anyhow::Result;
use serde::Serialize;
use tabled::builder::Builder;
use time::format_description::well_known::Rfc3339;

use aquamon_core::BleCandidate;
use aquamon_types::{
    BleDeviceConfig, ConnectionType, HttpDeviceConfig, SavedReading, SensorReading, Tank,
};

use crate::style;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }
}

/// Pretty-printed JSON with a trailing newline.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)? + "\n")
}

/// Epoch milliseconds as RFC 3339, or the raw number when out of range.
pub fn format_timestamp(reading: &SensorReading) -> String {
    reading
        .captured_at()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| reading.timestamp.to_string())
}

fn optional(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.2} {}", v, unit),
        None => "-".to_string(),
    }
}

/// Multi-line text rendering of one reading.
pub fn format_reading_text(reading: &SensorReading, opts: &FormatOptions) -> String {
    let mut out = format!(
        "Turbidity:     {} NTU ({})\n",
        style::format_turbidity_colored(reading.turbidity, opts.no_color),
        reading
            .level
            .clone()
            .unwrap_or_else(|| style::clarity_summary(reading.turbidity).to_string()),
    );
    if let Some(t) = reading.temperature {
        out.push_str(&format!(
            "Temperature:   {} °C\n",
            style::format_temp_colored(t, opts.no_color)
        ));
    }
    if let Some(ph) = reading.ph {
        out.push_str(&format!("pH:            {:.2}\n", ph));
    }
    if let Some(o2) = reading.dissolved_oxygen {
        out.push_str(&format!("Oxygen:        {:.2} mg/L\n", o2));
    }
    if let Some(nh3) = reading.ammonia {
        out.push_str(&format!("Ammonia:       {:.2} mg/L\n", nh3));
    }
    if let Some(battery) = reading.battery {
        out.push_str(&format!(
            "Battery:       {}\n",
            style::format_battery_colored(battery, opts.no_color)
        ));
    }
    out.push_str(&format!("Time:          {}\n", format_timestamp(reading)));
    out
}

/// One-line rendering used by `watch`.
pub fn format_reading_line(reading: &SensorReading, opts: &FormatOptions) -> String {
    let mut line = format!(
        "{}  {} NTU",
        format_timestamp(reading),
        style::format_turbidity_colored(reading.turbidity, opts.no_color)
    );
    if let Some(t) = reading.temperature {
        line.push_str(&format!(
            "  {} °C",
            style::format_temp_colored(t, opts.no_color)
        ));
    }
    if let Some(ph) = reading.ph {
        line.push_str(&format!("  pH {:.2}", ph));
    }
    line
}

/// Table of saved readings.
pub fn format_saved_readings(entries: &[SavedReading], opts: &FormatOptions) -> String {
    if entries.is_empty() {
        return "No saved readings.\n".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(["ID", "Time", "NTU", "°C", "pH", "Tank", "Synced"]);
    for entry in entries {
        let r = &entry.reading;
        builder.push_record([
            entry.id.chars().take(8).collect::<String>(),
            format_timestamp(r),
            style::format_turbidity_colored(r.turbidity, opts.no_color),
            r.temperature.map(|t| format!("{:.1}", t)).unwrap_or_else(|| "-".into()),
            r.ph.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".into()),
            entry.tank.clone().unwrap_or_else(|| "-".into()),
            if entry.synced { "yes" } else { "no" }.to_string(),
        ]);
    }
    let mut table = builder.build();
    style::apply_table_style(&mut table);
    format!("{}\n", table)
}

/// Table of tanks.
pub fn format_tanks(tanks: &[Tank]) -> String {
    if tanks.is_empty() {
        return "No tanks registered.\n".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record([
        "ID", "Name", "Type", "Species", "Fish", "Avg g", "Area m²", "Biomass kg", "Fish/m²",
    ]);
    for tank in tanks {
        builder.push_record([
            tank.id.chars().take(8).collect::<String>(),
            tank.name.clone(),
            tank.construction.to_string(),
            if tank.species.is_empty() { "-".into() } else { tank.species.clone() },
            tank.fish_count.to_string(),
            format!("{:.1}", tank.average_weight_g),
            format!("{:.1}", tank.area_m2),
            format!("{:.2}", tank.biomass_kg()),
            tank.stocking_density()
                .map(|d| format!("{:.1}", d))
                .unwrap_or_else(|| "-".into()),
        ]);
    }
    let mut table = builder.build();
    style::apply_table_style(&mut table);
    format!("{}\n", table)
}

/// Table of BLE scan results.
pub fn format_candidates(candidates: &[BleCandidate], opts: &FormatOptions) -> String {
    if candidates.is_empty() {
        return "No sensors found.\n".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(["Name", "Identifier", "Signal"]);
    for c in candidates {
        builder.push_record([
            c.name.clone().unwrap_or_else(|| "Unknown".into()),
            c.id.clone(),
            style::format_signal_bar(c.rssi, opts.no_color),
        ]);
    }
    let mut table = builder.build();
    style::apply_table_style(&mut table);
    format!("{}\n", table)
}

/// Device settings as shown by `config show`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub connection_type: ConnectionType,
    pub http: HttpDeviceConfig,
    pub ble: BleDeviceConfig,
}

/// Text rendering of the device settings.
pub fn format_device_summary(summary: &DeviceSummary) -> String {
    let active = |t: ConnectionType| if summary.connection_type == t { " (active)" } else { "" };
    let http = &summary.http;
    let ble = &summary.ble;
    let mut out = format!("Wi-Fi{}:\n", active(ConnectionType::Wifi));
    if http.is_configured {
        out.push_str(&format!("  URL:           {}\n", http.url()));
    } else {
        out.push_str("  not configured\n");
    }
    out.push_str(&format!("Bluetooth{}:\n", active(ConnectionType::Bluetooth)));
    if ble.is_configured {
        out.push_str(&format!("  Service:       {}\n", ble.service_uuid));
        out.push_str(&format!("  Characteristic: {}\n", ble.characteristic_uuid));
        if let Some(name) = &ble.device_name {
            out.push_str(&format!("  Name:          {}\n", name));
        }
    } else {
        out.push_str("  not configured\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquamon_types::TankConstruction;
    use time::OffsetDateTime;

    fn plain() -> FormatOptions {
        FormatOptions::new(true)
    }

    #[test]
    fn test_reading_text_lists_present_fields() {
        let reading = SensorReading::new(42.0, 1_700_000_000_000)
            .with_temperature(26.5)
            .with_ph(7.1);
        let text = format_reading_text(&reading, &plain());
        assert!(text.contains("42.0 NTU (Clear)"));
        assert!(text.contains("26.5 °C"));
        assert!(text.contains("pH:            7.10"));
        assert!(!text.contains("Oxygen"));
        assert!(text.contains("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_reading_text_prefers_device_level() {
        let reading = SensorReading::new(120.0, 0).with_level("moderada");
        assert!(format_reading_text(&reading, &plain()).contains("(moderada)"));
    }

    #[test]
    fn test_reading_line() {
        let reading = SensorReading::new(3.0, 0).with_temperature(25.0);
        let line = format_reading_line(&reading, &plain());
        assert!(line.ends_with("3.0 NTU  25.0 °C"));
    }

    #[test]
    fn test_saved_readings_table() {
        let mut entry = SavedReading::new("abcdef0123456789", SensorReading::new(8.0, 0));
        entry.tank = Some("Pond A".into());
        let out = format_saved_readings(&[entry], &plain());
        assert!(out.contains("abcdef01"));
        assert!(!out.contains("abcdef012"));
        assert!(out.contains("Pond A"));
        assert!(out.contains("no"));
        assert_eq!(format_saved_readings(&[], &plain()), "No saved readings.\n");
    }

    #[test]
    fn test_tanks_table() {
        let tank = Tank {
            id: "0123456789".into(),
            name: "Nursery".into(),
            construction: TankConstruction::Liner,
            species: "tilapia".into(),
            fish_count: 200,
            average_weight_g: 250.0,
            area_m2: 40.0,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let out = format_tanks(&[tank]);
        assert!(out.contains("Nursery"));
        assert!(out.contains("liner"));
        assert!(out.contains("50.00"));
        assert!(out.contains("5.0"));
    }

    #[test]
    fn test_device_summary_marks_active() {
        let summary = DeviceSummary {
            connection_type: ConnectionType::Wifi,
            http: HttpDeviceConfig::new("192.168.4.1", "80", "turbidez"),
            ble: BleDeviceConfig::default(),
        };
        let text = format_device_summary(&summary);
        assert!(text.contains("Wi-Fi (active)"));
        assert!(text.contains("http://192.168.4.1:80/turbidez"));
        assert!(text.contains("Bluetooth:\n  not configured"));
    }

    #[test]
    fn test_json_has_trailing_newline() {
        let json = format_json(&SensorReading::new(1.0, 0)).unwrap();
        assert!(json.ends_with("}\n"));
        assert!(json.contains("\"turbidity\""));
    }
}
