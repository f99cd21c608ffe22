//! Example: Watching a Wi-Fi Sensor
//!
//! Polls an ESP32 over HTTP through the connection coordinator and prints
//! every reading and state change until Ctrl-C.
//!
//! Run with: `cargo run --example watch_http -- <IP> [PORT] [ENDPOINT]`

use std::env;
use std::sync::Arc;

use aquamon_core::{
    ConnectionCoordinator, HttpDeviceConfig, HttpTransport, HttpTransportOptions, MonitorEvent,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(ip) = args.get(1) else {
        eprintln!("Usage: {} <IP> [PORT] [ENDPOINT]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} 192.168.1.100 80 turbidez", args[0]);
        std::process::exit(1);
    };
    let port = args.get(2).map(String::as_str).unwrap_or("80");
    let endpoint = args.get(3).map(String::as_str).unwrap_or("turbidez");

    let transport = HttpTransport::new(
        HttpDeviceConfig::new(ip, port, endpoint),
        HttpTransportOptions::default(),
    )?;
    println!("Watching {}", transport.config().url());

    let coordinator = ConnectionCoordinator::builder().build()?;
    coordinator.subscribe(|reading| {
        println!(
            "Turbidity: {:>7.1} NTU  Temperature: {}",
            reading.turbidity,
            reading
                .temperature
                .map(|t| format!("{t:.1} °C"))
                .unwrap_or_else(|| "-".to_string())
        );
    });

    let mut events = coordinator.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let MonitorEvent::StateChanged { to, reason, .. } = event {
                match reason {
                    Some(reason) => println!("State: {to} ({reason})"),
                    None => println!("State: {to}"),
                }
            }
        }
    });

    coordinator.configure(Some(Arc::new(transport)));
    tokio::signal::ctrl_c().await?;
    coordinator.stop();
    Ok(())
}
