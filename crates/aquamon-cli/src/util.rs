//! Utility functions for CLI operations.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use dialoguer::{Select, theme::ColorfulTheme};

use aquamon_core::{
    BleCandidate, DefaultTransportFactory, DevicePicker, FirstMatchPicker, Monitor, PickerOutcome,
};
use aquamon_store::{Store, keys};
use aquamon_types::BleDeviceConfig;

use crate::config::Config;

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    } else {
        print!("{}", content);
        io::stdout().flush()?;
    }
    Ok(())
}

/// Whether both stdin and stderr are attached to a terminal.
pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stderr().is_terminal()
}

/// Asks the user to choose among scanned sensors.
///
/// Outside a terminal it behaves like [`FirstMatchPicker`].
pub struct TerminalPicker {
    fallback: FirstMatchPicker,
}

impl TerminalPicker {
    pub fn new(preferred_name: Option<String>) -> Self {
        Self {
            fallback: FirstMatchPicker::new(preferred_name),
        }
    }
}

#[async_trait]
impl DevicePicker for TerminalPicker {
    async fn pick(&self, candidates: &[BleCandidate]) -> PickerOutcome {
        if candidates.len() == 1 || !is_interactive() {
            return self.fallback.pick(candidates).await;
        }

        let items: Vec<String> = candidates
            .iter()
            .map(|c| {
                let name = c.name.as_deref().unwrap_or("Unknown");
                match c.rssi {
                    Some(rssi) => format!("{} ({}, {} dBm)", name, c.id, rssi),
                    None => format!("{} ({})", name, c.id),
                }
            })
            .collect();

        let selection = tokio::task::spawn_blocking(move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select a sensor")
                .items(&items)
                .default(0)
                .interact_opt()
        })
        .await;

        match selection {
            Ok(Ok(Some(index))) => PickerOutcome::Selected(index),
            Ok(Ok(None)) => PickerOutcome::Cancelled,
            Ok(Err(e)) => {
                tracing::debug!("Device selection failed: {}", e);
                PickerOutcome::Cancelled
            }
            Err(e) => {
                tracing::debug!("Device selection task failed: {}", e);
                PickerOutcome::Cancelled
            }
        }
    }
}

/// Open the store named by `config` and assemble a monitor over it.
///
/// The monitor is not started.
pub fn open_monitor(config: &Config) -> Result<Monitor> {
    let path = config.database_path();
    let store = Store::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    let options = config.monitor_options();

    // The BLE transport resolves its own config; the picker only needs the name
    let preferred_name = store
        .load_or_default::<BleDeviceConfig>(keys::BLE_DEVICE)
        .ok()
        .and_then(|c| c.device_name);
    let factory = DefaultTransportFactory::new(options.http.clone(), options.ble.clone())
        .with_picker(Arc::new(TerminalPicker::new(preferred_name)));

    Monitor::builder()
        .options(options)
        .factory(Arc::new(factory))
        .build(store)
        .context("Failed to start monitor")
}

/// Lock the monitor's store.
pub fn lock_store(monitor: &Monitor) -> Result<MutexGuard<'_, Store>> {
    monitor
        .store()
        .lock()
        .map_err(|_| anyhow!("store lock poisoned"))
}
