//! Config command: CLI settings and device configuration.

use anyhow::{Context as _, Result, anyhow};
use clap::ValueEnum;
use serde::Serialize;

use aquamon_core::{DeviceSettings, Monitor};
use aquamon_types::{BleDeviceConfig, ConnectionType, HttpDeviceConfig, uuid as ble_uuid};

use super::Context;
use crate::cli::{ConfigAction, ConfigKey};
use crate::config::Config;
use crate::format::{DeviceSummary, format_device_summary, format_json};
use crate::style;
use crate::util::open_monitor;

#[derive(Serialize)]
struct ConfigReport<'a> {
    path: String,
    settings: &'a Config,
    devices: DeviceSummary,
}

fn device_summary(settings: &DeviceSettings) -> Result<DeviceSummary> {
    Ok(DeviceSummary {
        connection_type: settings.connection_type()?,
        http: settings.http_config()?,
        ble: settings.ble_config()?,
    })
}

pub fn cmd_config(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => ctx.emit(&format!("{}\n", ctx.config_path.display())),
        ConfigAction::Set { key, value } => {
            // Overrides from flags and env are not written back
            let mut file = Config::load(&ctx.config_path)?;
            file.set(key, &value)?;
            file.save(&ctx.config_path)?;
            ctx.status(&style::format_success(
                &format!("Saved {} to {}", key_name(key), ctx.config_path.display()),
                ctx.opts.no_color,
            ));
            Ok(())
        }
        ConfigAction::Show => {
            let monitor = open_monitor(&ctx.config)?;
            let devices = device_summary(monitor.settings())?;
            if ctx.json {
                return ctx.emit(&format_json(&ConfigReport {
                    path: ctx.config_path.display().to_string(),
                    settings: &ctx.config,
                    devices,
                })?);
            }
            let settings = toml::to_string_pretty(&ctx.config).context("Failed to render config")?;
            ctx.emit(&format!(
                "# {}\n{}\n# database: {}\n\n{}",
                ctx.config_path.display(),
                settings,
                ctx.config.database_path().display(),
                format_device_summary(&devices)
            ))
        }
        ConfigAction::Http { ip, port, endpoint } => {
            let monitor = open_monitor(&ctx.config)?;
            let config = HttpDeviceConfig::new(&ip, &port, &endpoint);
            save_device(&monitor, |settings| settings.set_http_config(&config))?;
            ctx.status(&style::format_success(
                &format!("Wi-Fi sensor set to {}", config.url()),
                ctx.opts.no_color,
            ));
            hint_active(ctx, &monitor, ConnectionType::Wifi)
        }
        ConfigAction::Ble {
            name,
            service,
            characteristic,
        } => {
            let monitor = open_monitor(&ctx.config)?;
            let service = service.unwrap_or_else(|| ble_uuid::NUS_SERVICE.to_string());
            let characteristic =
                characteristic.unwrap_or_else(|| ble_uuid::NUS_TX_CHARACTERISTIC.to_string());
            let config = BleDeviceConfig::new(&service, &characteristic, name.as_deref());
            save_device(&monitor, |settings| settings.set_ble_config(&config))?;
            ctx.status(&style::format_success(
                &format!("Bluetooth sensor set to service {}", config.service_uuid),
                ctx.opts.no_color,
            ));
            hint_active(ctx, &monitor, ConnectionType::Bluetooth)
        }
        ConfigAction::Use { transport } => {
            let monitor = open_monitor(&ctx.config)?;
            let connection_type = ConnectionType::from(transport);
            save_device(&monitor, |settings| {
                settings.set_connection_type(connection_type)
            })?;
            ctx.status(&style::format_success(
                &format!("Using {}", connection_type),
                ctx.opts.no_color,
            ));
            if !monitor.settings().active_config()?.is_valid() {
                ctx.status(&style::format_warning(
                    &format!("The {} sensor is not configured yet", connection_type),
                    ctx.opts.no_color,
                ));
            }
            Ok(())
        }
        ConfigAction::Clear { transport } => {
            let monitor = open_monitor(&ctx.config)?;
            let connection_type = ConnectionType::from(transport);
            save_device(&monitor, |settings| match connection_type {
                ConnectionType::Wifi => settings.clear_http_config(),
                ConnectionType::Bluetooth => settings.clear_ble_config(),
            })?;
            ctx.status(&style::format_success(
                &format!("Cleared {} settings", connection_type),
                ctx.opts.no_color,
            ));
            Ok(())
        }
    }
}

fn key_name(key: ConfigKey) -> String {
    key.to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_else(|| format!("{key:?}"))
}

/// Persist through the settings handle without connecting.
fn save_device(
    monitor: &Monitor,
    f: impl FnOnce(&DeviceSettings) -> aquamon_core::Result<()>,
) -> Result<()> {
    f(monitor.settings()).map_err(|e| anyhow!(e.user_message()))
}

fn hint_active(ctx: &Context, monitor: &Monitor, configured: ConnectionType) -> Result<()> {
    let active = monitor.settings().connection_type()?;
    if active != configured {
        ctx.status(&style::format_info(
            &format!(
                "Currently using {}. Run `aquamon config use {}` to switch.",
                active, configured
            ),
            ctx.opts.no_color,
        ));
    }
    Ok(())
}
