//! Error types for eco2-core.
//!
//! Every failure a session can report falls into one of four recoverable
//! categories, exposed through [`Error::kind`]:
//!
//! | Kind | Typical variants | Caller action |
//! |------|------------------|---------------|
//! | [`ErrorKind::TransportUnavailable`] | [`Error::Bluetooth`], [`Error::NotConnected`], [`Error::DeviceNotFound`], [`Error::Timeout`] | Retry connect |
//! | [`ErrorKind::AuthenticationRejected`] | [`Error::AuthenticationRejected`] | Check PIN, retry connect |
//! | [`ErrorKind::MalformedPayload`] | [`Error::MalformedPayload`], [`Error::CharacteristicNotFound`], [`Error::AccessDenied`] | Retry refresh |
//! | [`ErrorKind::CipherFailure`] | [`Error::Cipher`] | Check encryption key, retry connect |
//!
//! Argument validation errors ([`ErrorKind::InvalidArgument`]) are raised
//! before any Bluetooth traffic and are fixed by correcting the input.
//!
//! None of these are fatal: a session that returned an error is always in a
//! well-defined [`ConnectionState`](eco2_types::ConnectionState) with either
//! a complete reading or none at all.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::cipher::CipherError;

/// Errors that can occur when talking to an eco2 thermostat.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found while opening the link.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while the link is down.
    #[error("Not connected to device")]
    NotConnected,

    /// Characteristic missing from the device's GATT table.
    #[error("Characteristic not found: {uuid} (service {service})")]
    CharacteristicNotFound {
        /// Service that was searched.
        service: Uuid,
        /// The characteristic that was not found.
        uuid: Uuid,
    },

    /// Characteristic exists but does not allow the requested access.
    #[error("Characteristic {uuid} is not {access}")]
    AccessDenied {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The access that was refused.
        access: Access,
    },

    /// The device refused the PIN.
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Characteristic data was absent, oversize or misaligned.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Key setup or block decryption failed.
    #[error("Cipher failure: {0}")]
    Cipher(#[from] CipherError),

    /// Invalid address, PIN or key supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(eco2_types::ParseError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Access mode on a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read access.
    Read,
    /// Write access.
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => write!(f, "readable"),
            Access::Write => write!(f, "writable"),
        }
    }
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No Bluetooth adapter available.
    NoAdapter,
    /// No peripheral with the address appeared before the scan ended.
    NotFound { address: String, scanned: Duration },
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::NotFound { address, scanned } => {
                write!(f, "device '{}' not seen after {:?}", address, scanned)
            }
        }
    }
}

/// Failure category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Link could not be opened or was lost.
    TransportUnavailable,
    /// PIN write refused or PIN characteristic missing.
    AuthenticationRejected,
    /// Wrong-length or absent characteristic data.
    MalformedPayload,
    /// Key setup or decrypt primitive error.
    CipherFailure,
    /// Bad input rejected before any I/O.
    InvalidArgument,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Bluetooth(_)
            | Error::DeviceNotFound(_)
            | Error::NotConnected
            | Error::Timeout { .. } => ErrorKind::TransportUnavailable,
            Error::AuthenticationRejected(_) => ErrorKind::AuthenticationRejected,
            Error::MalformedPayload(_)
            | Error::CharacteristicNotFound { .. }
            | Error::AccessDenied { .. } => ErrorKind::MalformedPayload,
            Error::Cipher(_) => ErrorKind::CipherFailure,
            Error::InvalidArgument(_) | Error::InvalidConfig(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(service: Uuid, uuid: Uuid) -> Self {
        Self::CharacteristicNotFound { service, uuid }
    }

    /// Create a malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the device itself refused the request (as opposed to the
    /// link failing underneath it).
    pub(crate) fn is_refusal(&self) -> bool {
        matches!(
            self,
            Error::CharacteristicNotFound { .. } | Error::AccessDenied { .. }
        )
    }
}

impl From<eco2_types::ParseError> for Error {
    fn from(err: eco2_types::ParseError) -> Self {
        use eco2_types::ParseError;

        match err {
            ParseError::MalformedPayload(msg) => Error::MalformedPayload(msg),
            ParseError::InsufficientBytes { expected, actual } => Error::MalformedPayload(
                format!("expected at least {} bytes, got {}", expected, actual),
            ),
            other => Error::InvalidArgument(other),
        }
    }
}

/// Result type alias using eco2-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
