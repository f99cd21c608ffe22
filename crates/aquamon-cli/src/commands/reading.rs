//! Reading command: manual readings and the upload queue.

use anyhow::{Result, anyhow, bail};

use aquamon_core::{Monitor, SensorReading};
use aquamon_store::TankRepository;
use aquamon_types::now_millis;

use super::Context;
use crate::cli::{OutputFormat, ReadingAction};
use crate::format::{format_json, format_saved_readings};
use crate::style;
use crate::util::{lock_store, open_monitor};

fn check_value(name: &str, value: Option<f64>) -> Result<()> {
    if let Some(v) = value
        && (!v.is_finite() || v < 0.0)
    {
        bail!("{} must be a non-negative number, got {}", name, v);
    }
    Ok(())
}

/// Build a reading from user input.
fn manual_reading(
    turbidity: f64,
    temperature: Option<f64>,
    ph: Option<f64>,
    oxygen: Option<f64>,
    ammonia: Option<f64>,
) -> Result<SensorReading> {
    check_value("turbidity", Some(turbidity))?;
    check_value("oxygen", oxygen)?;
    check_value("ammonia", ammonia)?;
    if let Some(ph) = ph
        && !(0.0..=14.0).contains(&ph)
    {
        bail!("pH must be between 0 and 14, got {}", ph);
    }
    if let Some(t) = temperature
        && !t.is_finite()
    {
        bail!("temperature must be a number");
    }

    let mut reading = SensorReading::new(turbidity, now_millis());
    reading.temperature = temperature;
    reading.ph = ph;
    reading.dissolved_oxygen = oxygen;
    reading.ammonia = ammonia;
    Ok(reading)
}

fn warn_unknown_tank(ctx: &Context, monitor: &Monitor, tank: &str) -> Result<()> {
    let store = lock_store(monitor)?;
    if TankRepository::new(&store).find_by_name(tank)?.is_none() {
        ctx.status(&style::format_warning(
            &format!("No tank named '{}' is registered", tank),
            ctx.opts.no_color,
        ));
    }
    Ok(())
}

pub async fn cmd_reading(ctx: &Context, action: ReadingAction) -> Result<()> {
    let monitor = open_monitor(&ctx.config)?;
    match action {
        ReadingAction::Add {
            turbidity,
            temperature,
            ph,
            oxygen,
            ammonia,
            tank,
            notes,
        } => {
            let reading = manual_reading(turbidity, temperature, ph, oxygen, ammonia)?;
            if let Some(tank) = &tank {
                warn_unknown_tank(ctx, &monitor, tank)?;
            }
            let id = monitor.offline().save_entry(reading, tank, notes)?;
            ctx.status(&style::format_success(
                &format!("Saved reading {}", id),
                ctx.opts.no_color,
            ));

            if monitor.reconciler().is_some() {
                let report = monitor.sync_now().await.map_err(|e| anyhow!(e.user_message()))?;
                match report.error {
                    None if report.uploaded > 0 => ctx.status(&style::format_success(
                        &format!("Uploaded {} reading(s)", report.uploaded),
                        ctx.opts.no_color,
                    )),
                    None => {}
                    Some(error) => ctx.status(&style::format_warning(
                        &format!("Kept offline ({} pending): {}", report.pending, error),
                        ctx.opts.no_color,
                    )),
                }
            } else {
                let pending = monitor.offline().pending_count()?;
                ctx.status(&style::format_info(
                    &format!("{} reading(s) waiting for sync (no API configured)", pending),
                    ctx.opts.no_color,
                ));
            }
            ctx.emit(&format!("{}\n", id))
        }
        ReadingAction::List { pending, output } => {
            let entries = if pending {
                monitor.offline().get_unsynced_readings()?
            } else {
                monitor.offline().saved_readings()?
            };
            let content = match ctx.format(&output) {
                OutputFormat::Json => format_json(&entries)?,
                OutputFormat::Text => format_saved_readings(&entries, &ctx.opts),
            };
            ctx.emit(&content)
        }
        ReadingAction::ClearSynced => {
            let removed = monitor.offline().clear_synced_readings()?;
            ctx.status(&style::format_success(
                &format!("Removed {} synced reading(s)", removed),
                ctx.opts.no_color,
            ));
            Ok(())
        }
    }
}
