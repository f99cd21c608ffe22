//! HTTP polling transport for Wi-Fi connected sensors.
//!
//! The ESP32 serves its current reading as JSON at
//! `http://{ip}:{port}/{endpoint}`. When a relay is configured (the
//! application is served from a secure origin), requests go through the
//! relay's `/api/esp32/proxy?url=...` endpoint instead, with a longer timeout
//! covering the relay's own upstream wait.
//!
//! # Example
//!
//! ```no_run
//! use aquamon_core::http::{HttpTransport, HttpTransportOptions};
//! use aquamon_types::HttpDeviceConfig;
//!
//! # async fn example() -> aquamon_core::Result<()> {
//! let config = HttpDeviceConfig::new("192.168.1.100", "80", "turbidez");
//! let transport = HttpTransport::new(config, HttpTransportOptions::default())?;
//! let reading = transport.get_data().await?;
//! println!("Turbidity: {} NTU", reading.turbidity);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use aquamon_types::payload::parse_http_body;
use aquamon_types::{ConnectionType, HttpDeviceConfig, SensorReading, now_millis};

use crate::error::{Error, Result};
use crate::transport::DeviceTransport;

/// Timeout for requests sent straight to the device.
pub const DIRECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for requests sent through the relay.
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(15);

/// Path of the relay endpoint.
pub const RELAY_PATH: &str = "/api/esp32/proxy";

/// Options for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportOptions {
    /// Base URL of the relay service; `None` means direct requests.
    pub relay_url: Option<String>,
    /// Timeout for direct requests.
    pub direct_timeout: Duration,
    /// Timeout for relayed requests.
    pub relay_timeout: Duration,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            relay_url: None,
            direct_timeout: DIRECT_TIMEOUT,
            relay_timeout: RELAY_TIMEOUT,
        }
    }
}

impl HttpTransportOptions {
    /// Create options with defaults (direct requests).
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests through the relay at `url`.
    pub fn relay(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    /// Set the direct request timeout.
    pub fn direct_timeout(mut self, timeout: Duration) -> Self {
        self.direct_timeout = timeout;
        self
    }

    /// Set the relayed request timeout.
    pub fn relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    /// The timeout that applies to the configured path.
    pub fn timeout(&self) -> Duration {
        if self.relay_url.is_some() {
            self.relay_timeout
        } else {
            self.direct_timeout
        }
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.direct_timeout.is_zero() || self.relay_timeout.is_zero() {
            return Err(Error::invalid_config("HTTP timeouts must be > 0"));
        }
        if let Some(relay) = &self.relay_url
            && !relay.starts_with("http://")
            && !relay.starts_with("https://")
        {
            return Err(Error::invalid_config(format!(
                "relay URL must start with http:// or https://, got: {relay}"
            )));
        }
        Ok(())
    }
}

/// HTTP transport bound to one device configuration.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpDeviceConfig,
    options: HttpTransportOptions,
}

impl HttpTransport {
    /// Create a transport for `config`.
    pub fn new(config: HttpDeviceConfig, options: HttpTransportOptions) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::invalid_config(format!("HTTP client: {e}")))?;
        Self::with_client(config, options, client)
    }

    /// Create a transport with a custom reqwest Client.
    pub fn with_client(
        config: HttpDeviceConfig,
        options: HttpTransportOptions,
        client: Client,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            client,
            config,
            options,
        })
    }

    /// The bound device configuration.
    pub fn config(&self) -> &HttpDeviceConfig {
        &self.config
    }

    /// Whether requests go through the relay.
    pub fn via_relay(&self) -> bool {
        self.options.relay_url.is_some()
    }

    /// The URL the request is actually sent to.
    pub fn request_url(&self) -> Result<Url> {
        if !self.config.is_valid() {
            return Err(Error::not_configured("no device address set"));
        }
        if self.config.port_number().is_none() {
            return Err(Error::invalid_config(format!(
                "invalid port '{}'",
                self.config.port
            )));
        }

        let target = self.config.url();
        match &self.options.relay_url {
            Some(relay) => Url::parse_with_params(&format!("{relay}{RELAY_PATH}"), [("url", &target)])
                .map_err(|e| Error::invalid_config(format!("relay URL: {e}"))),
            None => Url::parse(&target)
                .map_err(|e| Error::invalid_config(format!("device URL '{target}': {e}"))),
        }
    }

    /// Fetch and decode the current reading.
    #[tracing::instrument(level = "debug", skip(self), fields(target = %self.config.url(), relay = self.via_relay()))]
    pub async fn get_data(&self) -> Result<SensorReading> {
        let url = self.request_url()?;
        let timeout = self.options.timeout();
        let operation = format!("GET {}", self.config.url());

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, &operation, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status, &operation, timeout));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, &operation, timeout))?;
        let reading = parse_http_body(&body, now_millis())?;
        debug!(turbidity = reading.turbidity, "Read sensor over HTTP");
        Ok(reading)
    }

    /// Whether one request returns a usable reading.
    pub async fn test_connection(&self) -> bool {
        match self.get_data().await {
            Ok(_) => true,
            Err(e) => {
                debug!("HTTP connection test failed: {}", e);
                false
            }
        }
    }

    fn status_error(&self, status: StatusCode, operation: &str, timeout: Duration) -> Error {
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!("{operation} returned 404")),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Error::timeout(operation, timeout)
            }
            StatusCode::FORBIDDEN if self.via_relay() => Error::invalid_config(format!(
                "relay refused '{}': not a private network address",
                self.config.ip
            )),
            other => Error::Unreachable(format!("{operation} returned HTTP {}", other.as_u16())),
        }
    }
}

/// Map a reqwest failure onto the error taxonomy.
pub(crate) fn classify(err: reqwest::Error, operation: &str, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::timeout(operation, timeout)
    } else if err.is_builder() {
        Error::invalid_config(err.to_string())
    } else {
        Error::Unreachable(format!("{operation}: {err}"))
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Wifi
    }

    fn describe(&self) -> String {
        match &self.options.relay_url {
            Some(relay) => format!("{} via {}", self.config.url(), relay),
            None => self.config.url(),
        }
    }

    fn is_configured(&self) -> bool {
        self.config.is_valid()
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(HttpTransport::test_connection(self).await)
    }

    async fn read(&self) -> Result<SensorReading> {
        self.get_data().await
    }
}
