//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use aquamon_core::{CoordinatorOptions, HttpTransportOptions, MonitorOptions};

use crate::cli::{Cli, ConfigKey};

/// Default poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default time the final sync status stays visible.
const DEFAULT_SYNC_STATUS_DISPLAY_MS: u64 = 3000;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Database path (defaults to the platform data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Readings API base URL; sync is disabled without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Relay service base URL; HTTP devices are polled directly without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,

    /// Interval between reads while connected
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Skip every sign-in check
    #[serde(default)]
    pub unauthenticated_dev_mode: bool,

    /// How long a finished sync keeps showing its status
    #[serde(default = "default_sync_status_display_ms")]
    pub sync_status_display_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_sync_status_display_ms() -> u64 {
    DEFAULT_SYNC_STATUS_DISPLAY_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            api_url: None,
            relay_url: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            unauthenticated_dev_mode: false,
            sync_status_display_ms: DEFAULT_SYNC_STATUS_DISPLAY_MS,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aquamon")
            .join("config.toml")
    }

    /// Load config from `path`, or return default if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Save config to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Apply command-line and environment overrides.
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(database) = &cli.database {
            self.database = Some(database.clone());
        }
        if let Some(api_url) = &cli.api_url {
            self.api_url = Some(api_url.clone());
        }
        if let Some(relay_url) = &cli.relay_url {
            self.relay_url = Some(relay_url.clone());
        }
        self
    }

    /// Change one setting from its textual value.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
        match key {
            ConfigKey::Database => self.database = optional(value).map(PathBuf::from),
            ConfigKey::ApiUrl => self.api_url = optional(value),
            ConfigKey::RelayUrl => self.relay_url = optional(value),
            ConfigKey::PollIntervalMs => {
                self.poll_interval_ms = value
                    .parse()
                    .with_context(|| format!("'{value}' is not a number of milliseconds"))?;
            }
            ConfigKey::UnauthenticatedDevMode => {
                self.unauthenticated_dev_mode = parse_bool(value)?;
            }
            ConfigKey::SyncStatusDisplayMs => {
                self.sync_status_display_ms = value
                    .parse()
                    .with_context(|| format!("'{value}' is not a number of milliseconds"))?;
            }
        }
        self.validate()
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        for (field, url) in [("api_url", &self.api_url), ("relay_url", &self.relay_url)] {
            if let Some(url) = url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                bail!("{field} must start with http:// or https://, got '{url}'");
            }
        }
        Ok(())
    }

    /// Database path, falling back to the platform default.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(aquamon_store::default_db_path)
    }

    /// Monitor options described by this config.
    pub fn monitor_options(&self) -> MonitorOptions {
        let mut http = HttpTransportOptions::new();
        if let Some(relay) = &self.relay_url {
            http = http.relay(relay.as_str());
        }
        MonitorOptions {
            coordinator: CoordinatorOptions::new()
                .poll_interval(Duration::from_millis(self.poll_interval_ms)),
            http,
            api_url: self.api_url.clone(),
            unauthenticated_dev_mode: self.unauthenticated_dev_mode,
            sync_status_display: Duration::from_millis(self.sync_status_display_ms),
            ..MonitorOptions::default()
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => bail!("'{other}' is not a boolean (use true or false)"),
    }
}
