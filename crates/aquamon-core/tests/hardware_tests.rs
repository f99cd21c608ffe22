//! Hardware integration tests for aquamon-core
//!
//! These tests require a powered ESP32 tank sensor advertising the Nordic
//! UART service and should be run with:
//! ```
//! cargo test --package aquamon-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the device via environment variables:
//! - `AQUAMON_BLE_DEVICE`: advertised name of the sensor (optional; the
//!   strongest signal wins otherwise)
//! - `AQUAMON_HTTP_DEVICE`: `ip:port` of the Wi-Fi sensor for the HTTP test

use std::env;
use std::time::Duration;

use aquamon_core::ble::{self, BleOptions, BleTransport};
use aquamon_core::{
    BleDeviceConfig, DeviceTransport, HttpDeviceConfig, HttpTransport,
    HttpTransportOptions, TransportEvent, uuids,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn device_name() -> Option<String> {
    env::var("AQUAMON_BLE_DEVICE").ok().filter(|s| !s.is_empty())
}

fn transport() -> BleTransport {
    let config = BleDeviceConfig::nordic_uart(device_name().as_deref());
    BleTransport::new(config, BleOptions::default()).expect("valid options")
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_finds_sensor() {
    let found = timeout(
        BLE_TIMEOUT,
        ble::scan(uuids::NUS_SERVICE, Duration::from_secs(5)),
    )
    .await
    .expect("scan timed out")
    .expect("scan failed");

    for candidate in &found {
        println!(
            "{} {:?} rssi={:?}",
            candidate.id, candidate.name, candidate.rssi
        );
    }
    assert!(!found.is_empty(), "no sensor advertising the UART service");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_read_disconnect() {
    let transport = transport();
    timeout(BLE_TIMEOUT, transport.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");
    assert!(transport.is_connected());

    let reading = timeout(BLE_TIMEOUT, transport.read())
        .await
        .expect("read timed out")
        .expect("read failed");
    println!("Turbidity: {} NTU", reading.turbidity);
    assert!(reading.turbidity >= 0.0);

    transport.disconnect().await.expect("disconnect failed");
    assert!(!transport.is_connected());
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_notifications_stream_readings() {
    let transport = transport();
    let mut events = transport.events();
    transport.connect().await.expect("connect failed");

    let mut readings = 0;
    while readings < 3 {
        match timeout(BLE_TIMEOUT, events.recv()).await {
            Ok(Ok(TransportEvent::Reading(r))) => {
                println!("{:?}", r);
                readings += 1;
            }
            Ok(Ok(TransportEvent::Disconnected)) => panic!("sensor disconnected"),
            Ok(Err(e)) => panic!("event stream closed: {e}"),
            Err(_) => panic!("no notification within {:?}", BLE_TIMEOUT),
        }
    }
    transport.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_reconnect_after_disconnect() {
    let transport = transport();
    for _ in 0..2 {
        transport.connect().await.expect("connect failed");
        assert!(transport.test_connection().await.expect("test failed"));
        transport.disconnect().await.expect("disconnect failed");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::test]
#[ignore = "requires a Wi-Fi sensor on the local network"]
async fn test_http_sensor_answers() {
    let Some(target) = env::var("AQUAMON_HTTP_DEVICE").ok() else {
        eprintln!("AQUAMON_HTTP_DEVICE not set, skipping");
        return;
    };
    let (ip, port) = target.split_once(':').unwrap_or((target.as_str(), "80"));
    let transport = HttpTransport::new(
        HttpDeviceConfig::new(ip, port, "turbidez"),
        HttpTransportOptions::default(),
    )
    .expect("valid config");

    let reading = transport.read().await.expect("read failed");
    println!("Turbidity: {} NTU", reading.turbidity);
}
