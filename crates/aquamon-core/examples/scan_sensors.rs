//! Example: Scanning for BLE Tank Sensors
//!
//! Lists every nearby peripheral advertising the Nordic UART service,
//! which is what the ESP32 firmware exposes.
//!
//! Run with: `cargo run --example scan_sensors -- [SECONDS]`

use std::env;
use std::time::Duration;

use aquamon_core::ble;
use aquamon_core::uuids::NUS_SERVICE;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let seconds = env::args()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5);

    println!("Scanning for {} seconds...", seconds);
    let found = ble::scan(NUS_SERVICE, Duration::from_secs(seconds)).await?;

    if found.is_empty() {
        println!("No sensors found.");
        return Ok(());
    }

    println!();
    println!("{:<24} {:<20} {:>6}", "ID", "NAME", "RSSI");
    for candidate in found {
        println!(
            "{:<24} {:<20} {:>6}",
            candidate.id,
            candidate.name.as_deref().unwrap_or("-"),
            candidate
                .rssi
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
