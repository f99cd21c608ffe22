//! Watch command: live readings until interrupted.
//!
//! Readings go to the output; connection changes, notifications and sync
//! status go to stderr so the output stays machine-readable.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use aquamon_core::{MonitorEvent, NotificationKind};
use aquamon_types::ConnectionState;

use super::Context;
use crate::cli::{OutputArgs, OutputFormat};
use crate::format::{format_reading_line, format_timestamp};
use crate::style;
use crate::util::open_monitor;

/// How often the readings API is probed for connectivity.
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Delay before testing the sensor again after a failure.
const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Arguments for the watch command.
#[derive(Debug, Clone)]
pub struct WatchArgs {
    pub interval_ms: Option<u64>,
    pub count: u64,
    pub output: OutputArgs,
}

pub async fn cmd_watch(ctx: &Context, args: WatchArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(interval) = args.interval_ms {
        config.poll_interval_ms = interval;
    }
    config.validate()?;

    let monitor = open_monitor(&config)?;
    let format = ctx.format(&args.output);

    if !monitor.settings().active_config()?.is_valid() {
        bail!("No sensor configured. Run `aquamon config http <IP>` or `aquamon config ble` first.");
    }

    if let Some(cached) = monitor.offline().cached_sensor_data()? {
        ctx.status(&style::format_info(
            &format!(
                "Last known: {} NTU at {}",
                style::format_turbidity_colored(cached.turbidity, ctx.opts.no_color),
                format_timestamp(&cached)
            ),
            ctx.opts.no_color,
        ));
    }

    let mut events = monitor.events().events();
    if let Some(api) = &config.api_url {
        monitor.start_probe(
            format!("{}/api/health", api.trim_end_matches('/')),
            PROBE_INTERVAL,
        );
    }
    monitor.start()?;
    ctx.status(&format!("Watching (poll every {} ms). Press Ctrl+C to stop.", config.poll_interval_ms));

    let mut received = 0u64;
    let mut retry_at: Option<Instant> = None;
    loop {
        let deadline = retry_at;
        let retry = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            _ = retry => {
                retry_at = None;
                monitor.coordinator().retry();
            }
            event = events.recv() => match event {
                Ok(MonitorEvent::Reading { reading }) => {
                    let line = match format {
                        OutputFormat::Json => serde_json::to_string(&reading)? + "\n",
                        OutputFormat::Text => format_reading_line(&reading, &ctx.opts) + "\n",
                    };
                    ctx.emit(&line)?;
                    received += 1;
                    if args.count > 0 && received >= args.count {
                        break;
                    }
                }
                Ok(MonitorEvent::StateChanged { to, reason, .. }) => {
                    let badge = style::format_state_badge(to, ctx.opts.no_color);
                    match (to, reason) {
                        (ConnectionState::Failed, Some(reason)) => {
                            ctx.status(&format!(
                                "{} {} (retrying in {}s)",
                                badge,
                                reason,
                                RETRY_DELAY.as_secs()
                            ));
                            retry_at = Some(Instant::now() + RETRY_DELAY);
                        }
                        // A failure without reason is a user cancellation; no retry
                        (_, Some(reason)) => ctx.status(&format!("{} {}", badge, reason)),
                        (_, None) => ctx.status(&badge),
                    }
                }
                Ok(MonitorEvent::Notification { notification }) => {
                    let line = match notification.kind {
                        NotificationKind::ConnectionLost | NotificationKind::SyncFailed => {
                            style::format_warning(&notification.message, ctx.opts.no_color)
                        }
                        _ => style::format_info(&notification.message, ctx.opts.no_color),
                    };
                    ctx.status(&line);
                }
                Ok(MonitorEvent::SyncStatus { status }) => {
                    ctx.status(&style::format_sync_badge(status, ctx.opts.no_color));
                }
                Ok(MonitorEvent::Connectivity { online }) => {
                    ctx.status(&style::format_info(
                        if online { "Back online" } else { "Offline" },
                        ctx.opts.no_color,
                    ));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}
