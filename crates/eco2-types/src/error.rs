//! Error types for data parsing in eco2-types.

use thiserror::Error;

/// Errors that can occur when parsing eco2 identifiers, credentials and payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in eco2-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Text is not a valid `XX:XX:XX:XX:XX:XX` hardware address.
    #[error("Invalid address '{0}': expected six hex octets like A1:B2:C3:D4:E5:F6")]
    InvalidAddress(String),

    /// PIN outside of `0..=9999`.
    #[error("Invalid PIN {0}: must be between 0 and 9999")]
    InvalidPin(i64),

    /// Encryption key of the wrong size.
    #[error("Invalid encryption key: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Encryption key text is not valid hex.
    #[error("Invalid encryption key hex: {0}")]
    InvalidKeyHex(String),

    /// Payload is empty, oversize or otherwise unusable.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Payload is shorter than the field being decoded.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes present.
        actual: usize,
    },
}

/// Result type alias using eco2-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
