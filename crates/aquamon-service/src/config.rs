//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Device relay settings.
    pub relay: RelayConfig,
    /// Simulated sensor settings.
    pub demo: DemoConfig,
    /// Storage settings.
    pub storage: StorageConfig,
}

/// Default configuration file location (`~/.config/aquamon/server.toml`).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aquamon")
        .join("server.toml")
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use aquamon_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.relay.validate());
        errors.extend(self.demo.validate());
        errors.extend(self.storage.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Capacity of the received-readings broadcast channel.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_buffer: 100,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                )),
                Some((_, port)) => match port.parse::<u16>() {
                    Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                    Err(_) => errors.push(ValidationError::new(
                        "server.bind",
                        format!("invalid port '{}': must be a number 1-65535", port),
                    )),
                    Ok(_) => {}
                },
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError::new(
                "server.broadcast_buffer",
                "broadcast buffer must be at least 1",
            ));
        }

        errors
    }
}

/// Minimum relay upstream timeout in seconds.
pub const MIN_RELAY_TIMEOUT: u64 = 1;
/// Maximum relay upstream timeout in seconds.
pub const MAX_RELAY_TIMEOUT: u64 = 60;

/// Device relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upstream request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether loopback targets (`localhost`, `127.0.0.0/8`, `::1`) may be relayed.
    pub allow_localhost: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            allow_localhost: true,
        }
    }
}

impl RelayConfig {
    /// Upstream timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate relay configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !(MIN_RELAY_TIMEOUT..=MAX_RELAY_TIMEOUT).contains(&self.timeout_secs) {
            errors.push(ValidationError::new(
                "relay.timeout_secs",
                format!(
                    "timeout {} is out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_RELAY_TIMEOUT, MAX_RELAY_TIMEOUT
                ),
            ));
        }
        errors
    }
}

/// Simulated sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Whether `/api/turbidez` is served.
    pub enabled: bool,
    /// Lower bound of the injected latency.
    pub min_latency_ms: u64,
    /// Upper bound of the injected latency.
    pub max_latency_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_latency_ms: 100,
            max_latency_ms: 500,
        }
    }
}

impl DemoConfig {
    /// Validate demo configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.min_latency_ms > self.max_latency_ms {
            errors.push(ValidationError::new(
                "demo.min_latency_ms",
                format!(
                    "minimum latency {}ms exceeds maximum {}ms",
                    self.min_latency_ms, self.max_latency_ms
                ),
            ));
        }
        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: aquamon_store::default_db_path()
                .with_file_name("server.db"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `relay.timeout_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.relay.timeout(), Duration::from_secs(10));
        assert!(config.relay.allow_localhost);
        assert!(config.demo.enabled);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.relay.timeout_secs = 20;
        config.relay.allow_localhost = false;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.relay.timeout_secs, 20);
        assert!(!loaded.relay.allow_localhost);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.relay.timeout_secs, 5);
        assert!(config.relay.allow_localhost);
        assert_eq!(config.server.broadcast_buffer, 100);
        assert_eq!(config.demo.max_latency_ms, 500);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = Config::load("/nonexistent/aquamon/server.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[server\nbind = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_bind_address_validation() {
        let valid = ServerConfig {
            bind: "0.0.0.0:8080".to_string(),
            ..Default::default()
        };
        assert!(valid.validate().is_empty());

        let no_port = ServerConfig {
            bind: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let errors = no_port.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("host:port"));

        let port_zero = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        assert!(port_zero.validate()[0].message.contains("cannot be 0"));

        let bad_port = ServerConfig {
            bind: "127.0.0.1:abc".to_string(),
            ..Default::default()
        };
        assert!(bad_port.validate()[0].message.contains("must be a number"));
    }

    #[test]
    fn test_relay_and_demo_validation() {
        let relay = RelayConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(relay.validate().len(), 1);

        let demo = DemoConfig {
            min_latency_ms: 900,
            max_latency_ms: 100,
            ..Default::default()
        };
        assert_eq!(demo.validate()[0].field, "demo.min_latency_ms");
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.server.broadcast_buffer = 0;
        config.relay.timeout_secs = 600;
        config.storage.path = PathBuf::new();

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec![
                        "server.broadcast_buffer",
                        "relay.timeout_secs",
                        "storage.path"
                    ]
                );
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError::new("server.bind", "port cannot be 0"),
            ValidationError::new("storage.path", "cannot be empty"),
        ]);
        let display = format!("{}", error);
        assert!(display.contains("server.bind: port cannot be 0"));
        assert!(display.contains("storage.path"));
    }
}
