//! Error types for data parsing in aquamon-types.

use thiserror::Error;

/// Errors that can occur when parsing device payloads or configuration values.
///
/// This error type is platform-agnostic and does not include transport
/// errors (those belong in aquamon-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is structurally valid but carries an unusable value.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A required field is absent or has the wrong type.
    #[error("Missing or non-numeric field '{0}'")]
    MissingField(&'static str),

    /// The payload could not be parsed as JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The payload bytes are not valid UTF-8.
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    /// The payload is neither a JSON reading nor a plain number.
    #[error("Unrecognized payload: {0:?}")]
    Unrecognized(String),

    /// A UUID string could not be parsed.
    #[error("Invalid UUID '{0}'")]
    InvalidUuid(String),
}

/// Result type alias using aquamon-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
