//! Read command: one reading through the connection coordinator.

use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout_at};

use aquamon_core::{EventReceiver, Monitor, MonitorEvent, SensorReading};
use aquamon_types::ConnectionState;

use super::Context;
use crate::cli::{OutputArgs, OutputFormat};
use crate::format::{format_json, format_reading_text, format_timestamp};
use crate::style;
use crate::util::open_monitor;

/// Why no fresh reading arrived.
#[derive(Debug)]
enum ReadFailure {
    Failed(Option<String>),
    TimedOut,
}

/// Wait for the first reading, or the failure of the first check.
async fn first_reading(
    events: &mut EventReceiver,
    deadline: Instant,
) -> std::result::Result<SensorReading, ReadFailure> {
    loop {
        match timeout_at(deadline, events.recv()).await {
            Err(_) => return Err(ReadFailure::TimedOut),
            Ok(Ok(MonitorEvent::Reading { reading })) => return Ok(reading),
            Ok(Ok(MonitorEvent::StateChanged {
                to: ConnectionState::Failed,
                reason,
                ..
            })) => return Err(ReadFailure::Failed(reason)),
            Ok(Ok(MonitorEvent::StateChanged {
                to: ConnectionState::NotConfigured,
                ..
            })) => return Err(ReadFailure::Failed(Some("no sensor configured".into()))),
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) => return Err(ReadFailure::Failed(None)),
        }
    }
}

pub async fn cmd_read(ctx: &Context, timeout: u64, output: &OutputArgs) -> Result<()> {
    let monitor = open_monitor(&ctx.config)?;
    let active = monitor.settings().active_config()?;
    if !active.is_valid() {
        bail!(
            "No sensor configured.\n\
             Run `aquamon config http <IP>` or `aquamon config ble`, then `aquamon config use <wifi|bluetooth>`."
        );
    }

    let spinner = (!ctx.quiet && io::stderr().is_terminal())
        .then(|| style::connecting_spinner(&active.to_string()));

    let mut events = monitor.events().events();
    monitor.start()?;
    let result = first_reading(&mut events, Instant::now() + Duration::from_secs(timeout)).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    monitor.shutdown().await;

    match result {
        Ok(reading) => print_reading(ctx, output, &reading),
        Err(failure) => fall_back_to_cache(ctx, output, &monitor, failure),
    }
}

fn print_reading(ctx: &Context, output: &OutputArgs, reading: &SensorReading) -> Result<()> {
    let content = match ctx.format(output) {
        OutputFormat::Json => format_json(reading)?,
        OutputFormat::Text => format_reading_text(reading, &ctx.opts),
    };
    ctx.emit(&content)
}

/// Show the last-known reading when the sensor could not be read.
fn fall_back_to_cache(
    ctx: &Context,
    output: &OutputArgs,
    monitor: &Monitor,
    failure: ReadFailure,
) -> Result<()> {
    let reason = match failure {
        ReadFailure::TimedOut => "timed out waiting for the sensor".to_string(),
        ReadFailure::Failed(Some(reason)) => reason,
        ReadFailure::Failed(None) => "not connected".to_string(),
    };
    match monitor.offline().cached_sensor_data()? {
        Some(cached) => {
            ctx.status(&style::format_warning(
                &format!(
                    "Could not read the sensor ({}). Showing last known reading from {}.",
                    reason,
                    format_timestamp(&cached)
                ),
                ctx.opts.no_color,
            ));
            print_reading(ctx, output, &cached)
        }
        None => bail!("Could not read the sensor: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquamon_core::EventBus;

    #[tokio::test]
    async fn test_first_reading_skips_unrelated_events() {
        let bus = EventBus::default();
        let mut rx = bus.events();
        bus.emit(MonitorEvent::Connectivity { online: true });
        bus.emit(MonitorEvent::StateChanged {
            from: ConnectionState::NotConfigured,
            to: ConnectionState::Testing,
            reason: None,
        });
        bus.publish_reading(&SensorReading::new(12.0, 0));

        let reading = first_reading(&mut rx, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reading.turbidity, 12.0);
    }

    #[tokio::test]
    async fn test_first_reading_reports_failure_reason() {
        let bus = EventBus::default();
        let mut rx = bus.events();
        bus.emit(MonitorEvent::StateChanged {
            from: ConnectionState::Testing,
            to: ConnectionState::Failed,
            reason: Some("Unreachable: 192.168.4.1".into()),
        });
        match first_reading(&mut rx, Instant::now() + Duration::from_secs(1)).await {
            Err(ReadFailure::Failed(Some(reason))) => assert!(reason.contains("192.168.4.1")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reading_times_out() {
        let bus = EventBus::default();
        let mut rx = bus.events();
        let result = first_reading(&mut rx, Instant::now() + Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ReadFailure::TimedOut)));
    }
}
