//! Error types for aquamon-core.
//!
//! Transport failures are classified at the adapter boundary into a small
//! taxonomy so callers can react without inspecting transport details:
//!
//! | Error | Meaning | Typical reaction |
//! |-------|---------|------------------|
//! | [`Error::NotConfigured`] | No device identity set | Prompt for setup |
//! | [`Error::NotFound`] | Device, endpoint or characteristic missing | Check configuration |
//! | [`Error::Unreachable`] | Network-level failure | Next poll retries |
//! | [`Error::Timeout`] | Bounded wait exceeded | Next poll retries |
//! | [`Error::Malformed`] | Response lacks the expected shape | Check firmware |
//! | [`Error::Unauthorized`] / [`Error::SessionExpired`] | Auth layer | Redirect to login |
//! | [`Error::UserCancelled`] | Device picker dismissed | Nothing; not an error |
//!
//! [`Error::user_message`] gives the text to show a user.

use std::time::Duration;

use thiserror::Error;

use aquamon_types::ParseError;

/// Errors that can occur in the connectivity core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No usable device configuration.
    #[error("Device not configured: {0}")]
    NotConfigured(String),

    /// The device, endpoint or characteristic does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Network-level failure reaching the device or API.
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// The response parsed but lacks the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(#[from] ParseError),

    /// No authenticated session.
    #[error("Authentication required")]
    Unauthorized,

    /// The cached offline session has expired.
    #[error("Offline session expired")]
    SessionExpired,

    /// The user dismissed the device picker.
    #[error("Cancelled by user")]
    UserCancelled,

    /// Bluetooth cannot be used on this host.
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Store(#[from] aquamon_store::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The remote API rejected or failed an upload.
    #[error("Upload failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upload {
        /// HTTP status, when the API answered.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a not-configured error.
    pub fn not_configured(what: impl Into<String>) -> Self {
        Self::NotConfigured(what.into())
    }

    /// Whether this is the picker-dismissed signal rather than a failure.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }

    /// Whether the failure is transient and the next poll may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Unreachable(_) | Self::Bluetooth(_)
        )
    }

    /// Text suitable for showing to a user.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured(_) => {
                "The sensor is not configured. Set its address or Bluetooth identity first."
                    .to_string()
            }
            Self::NotFound(what) => format!("Sensor not found ({what}). Check the configuration."),
            Self::Timeout { duration, .. } => format!(
                "The sensor did not answer within {} seconds.",
                duration.as_secs().max(1)
            ),
            Self::Unreachable(_) => {
                "Cannot reach the sensor. Check that it is powered and on the same network."
                    .to_string()
            }
            Self::Malformed(_) => "The sensor sent data in an unexpected format.".to_string(),
            Self::Unauthorized => "Please sign in to continue.".to_string(),
            Self::SessionExpired => {
                "Your offline session has expired. Connect to the internet and sign in again."
                    .to_string()
            }
            Self::UserCancelled => "No device selected.".to_string(),
            Self::BluetoothUnavailable(reason) => reason.clone(),
            Self::Bluetooth(e) => format!("Bluetooth error: {e}"),
            Self::Store(_) => "Local storage is unavailable.".to_string(),
            Self::InvalidConfig(msg) => format!("Invalid configuration: {msg}"),
            Self::Upload { .. } => {
                "Could not upload saved readings. They stay queued for the next sync.".to_string()
            }
        }
    }
}

/// Result type alias using aquamon-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::timeout("GET http://192.168.1.100:80/turbidez", Duration::from_secs(5));
        assert!(err.to_string().contains("turbidez"));
        assert!(err.to_string().contains("5s"));

        let err = Error::Upload {
            status: Some(500),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Upload failed (500): boom");

        let err = Error::Upload {
            status: None,
            message: "refused".into(),
        };
        assert_eq!(err.to_string(), "Upload failed: refused");
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = ParseError::MissingField("turbidez").into();
        assert!(matches!(err, Error::Malformed(_)));
        assert!(err.to_string().contains("turbidez"));
    }

    #[test]
    fn test_user_cancelled_classification() {
        assert!(Error::UserCancelled.is_user_cancelled());
        assert!(!Error::NotFound("x".into()).is_user_cancelled());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Unreachable("refused".into()).is_transient());
        assert!(Error::timeout("read", Duration::from_secs(1)).is_transient());
        assert!(!Error::not_configured("ip").is_transient());
    }

    #[test]
    fn test_user_message_passes_bluetooth_reason_through() {
        let err = Error::BluetoothUnavailable("No Bluetooth adapter found".into());
        assert_eq!(err.user_message(), "No Bluetooth adapter found");
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
