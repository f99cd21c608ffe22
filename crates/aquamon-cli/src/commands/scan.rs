//! Scan command implementation.

use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::{Result, anyhow};

use aquamon_core::ble;

use super::Context;
use crate::cli::{OutputArgs, OutputFormat};
use crate::format::{format_candidates, format_json};
use crate::style;
use crate::util::open_monitor;

pub async fn cmd_scan(ctx: &Context, timeout: u64, output: &OutputArgs) -> Result<()> {
    let monitor = open_monitor(&ctx.config)?;
    // Scan for the configured service, which defaults to Nordic UART
    let service = monitor
        .settings()
        .ble_config()?
        .service()
        .map_err(|e| anyhow!("Invalid service UUID in BLE settings: {}", e))?;

    let spinner = (!ctx.quiet && io::stderr().is_terminal()).then(|| style::scanning_spinner(timeout));
    let result = ble::scan(service, Duration::from_secs(timeout)).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let mut found = result.map_err(|e| anyhow!(e.user_message()))?;
    found.sort_by_key(|c| std::cmp::Reverse(c.rssi.unwrap_or(i16::MIN)));

    let content = match ctx.format(output) {
        OutputFormat::Json => format_json(&found)?,
        OutputFormat::Text => format_candidates(&found, &ctx.opts),
    };
    ctx.emit(&content)?;
    if !found.is_empty() && ctx.format(output) == OutputFormat::Text {
        ctx.status(&style::format_info(
            "Run `aquamon config ble --name <NAME>` to prefer one of these sensors.",
            ctx.opts.no_color,
        ));
    }
    Ok(())
}
