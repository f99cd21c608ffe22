//! Visual styling utilities for the CLI.
//!
//! Spinners for operations that wait on a device, and color thresholds for
//! water-quality values.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use aquamon_types::{ConnectionState, SyncStatus};

// ============================================================================
// Progress Indicators
// ============================================================================

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

/// Create a spinner showing `message`.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Create a spinner for scanning operations.
pub fn scanning_spinner(timeout_secs: u64) -> ProgressBar {
    spinner(format!("Scanning for sensors... ({}s)", timeout_secs))
}

/// Create a spinner for connecting to a device.
pub fn connecting_spinner(device: &str) -> ProgressBar {
    spinner(format!("Connecting to {}...", device))
}

// ============================================================================
// Color Thresholds
// ============================================================================

/// Turbidity thresholds (NTU), matching the firmware's clarity levels.
pub mod turbidity {
    pub const CLEAR: f64 = 50.0; // Green: < 50 NTU
    pub const MODERATE: f64 = 500.0; // Yellow: 50-500 NTU
    // Red: > 500 NTU
}

/// Battery thresholds (percentage).
pub mod battery {
    pub const LOW: u8 = 20;
    pub const MEDIUM: u8 = 40;
}

/// Comfortable water temperature range for warm-water fish (°C).
pub mod temperature {
    pub const COLD: f64 = 22.0;
    pub const WARM: f64 = 32.0;
}

/// Format turbidity with a color for its clarity band.
pub fn format_turbidity_colored(ntu: f64, no_color: bool) -> String {
    let formatted = format!("{:.1}", ntu);
    if no_color {
        return formatted;
    }
    if ntu < turbidity::CLEAR {
        format!("{}", formatted.green())
    } else if ntu < turbidity::MODERATE {
        format!("{}", formatted.yellow())
    } else {
        format!("{}", formatted.red())
    }
}

/// Clarity label for a turbidity value.
pub fn clarity_summary(ntu: f64) -> &'static str {
    if ntu < turbidity::CLEAR {
        "Clear"
    } else if ntu < turbidity::MODERATE {
        "Moderate"
    } else {
        "Turbid"
    }
}

/// Format water temperature with a color.
pub fn format_temp_colored(celsius: f64, no_color: bool) -> String {
    let formatted = format!("{:.1}", celsius);
    if no_color {
        return formatted;
    }
    if celsius < temperature::COLD {
        format!("{}", formatted.cyan())
    } else if celsius > temperature::WARM {
        // Orange
        format!("{}", formatted.truecolor(255, 165, 0))
    } else {
        format!("{}", formatted.green())
    }
}

/// Format battery percentage with appropriate color.
pub fn format_battery_colored(percent: u8, no_color: bool) -> String {
    if no_color {
        return format!("{}%", percent);
    }
    if percent < battery::LOW {
        format!("{}%", percent.red())
    } else if percent < battery::MEDIUM {
        format!("{}%", percent.yellow())
    } else {
        format!("{}%", percent.green())
    }
}

/// Format RSSI as a four-step signal bar.
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let Some(rssi) = rssi else {
        return "----".to_string();
    };
    let bars = match rssi {
        r if r >= -55 => 4,
        r if r >= -67 => 3,
        r if r >= -80 => 2,
        _ => 1,
    };
    let bar = format!("{}{}", "#".repeat(bars), "-".repeat(4 - bars));
    if no_color {
        bar
    } else if bars >= 3 {
        format!("{}", bar.green())
    } else if bars == 2 {
        format!("{}", bar.yellow())
    } else {
        format!("{}", bar.red())
    }
}

/// Connection state as a colored badge.
pub fn format_state_badge(state: ConnectionState, no_color: bool) -> String {
    let label = format!("[{}]", state);
    if no_color {
        return label;
    }
    match state {
        ConnectionState::Connected => format!("{}", label.green()),
        ConnectionState::Testing => format!("{}", label.cyan()),
        ConnectionState::Failed => format!("{}", label.red()),
        ConnectionState::NotConfigured | ConnectionState::Stopped => {
            format!("{}", label.dimmed())
        }
    }
}

/// Sync status as a colored badge.
pub fn format_sync_badge(status: SyncStatus, no_color: bool) -> String {
    let label = format!("[sync: {}]", status);
    if no_color {
        return label;
    }
    match status {
        SyncStatus::Synced => format!("{}", label.green()),
        SyncStatus::Syncing => format!("{}", label.cyan()),
        SyncStatus::Error => format!("{}", label.red()),
        SyncStatus::Idle => format!("{}", label.dimmed()),
    }
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}

/// Format an info message.
pub fn format_info(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[--] {}", message)
    } else {
        format!("{} {}", "[--]".cyan(), message)
    }
}

/// Format a warning message.
pub fn format_warning(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[!!] {}", message)
    } else {
        format!("{} {}", "[!!]".yellow(), message)
    }
}

/// Apply the standard rounded table style.
pub fn apply_table_style(table: &mut tabled::Table) {
    table.with(tabled::settings::Style::rounded());
}
