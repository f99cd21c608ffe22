//! Sync command: upload pending readings to the readings API.

use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::Context;
use crate::format::format_json;
use crate::style;
use crate::util::open_monitor;

#[derive(Serialize)]
struct SyncOutput {
    uploaded: usize,
    pending: usize,
    error: Option<String>,
    last_sync: Option<String>,
}

fn format_millis(millis: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
}

pub async fn cmd_sync(ctx: &Context) -> Result<()> {
    if ctx.config.api_url.is_none() {
        bail!(
            "No readings API configured.\n\
             Set one with `aquamon config set api-url <URL>` or AQUAMON_API_URL."
        );
    }
    let monitor = open_monitor(&ctx.config)?;

    let pending = monitor.offline().pending_count()?;
    if pending == 0 {
        ctx.status(&style::format_info("Nothing to sync", ctx.opts.no_color));
    } else {
        ctx.status(&format!("Uploading {} reading(s)...", pending));
    }

    let report = monitor.sync_now().await.map_err(|e| anyhow!(e.user_message()))?;
    let last_sync = monitor.offline().last_sync_time()?.and_then(format_millis);

    if ctx.json {
        ctx.emit(&format_json(&SyncOutput {
            uploaded: report.uploaded,
            pending: report.pending,
            error: report.error.clone(),
            last_sync,
        })?)?;
    } else if report.is_complete() {
        if report.uploaded > 0 {
            ctx.status(&style::format_success(
                &format!("Uploaded {} reading(s)", report.uploaded),
                ctx.opts.no_color,
            ));
        }
        if let Some(last) = last_sync {
            ctx.status(&format!("Last sync: {}", last));
        }
    }

    match report.error {
        None => Ok(()),
        Some(error) => bail!(
            "Sync stopped after {} upload(s); {} reading(s) stay queued: {}",
            report.uploaded,
            report.pending,
            error
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0).as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(format_millis(i64::MAX), None);
    }
}
