//! Transport abstraction between a [`Session`](crate::Session) and the radio.
//!
//! [`BleTransport`](crate::BleTransport) talks to real hardware through
//! btleplug; [`MockTransport`](crate::MockTransport) is an in-memory device
//! for tests.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use eco2_types::BleAddress;

use crate::error::Result;

/// Link lifecycle notification from a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    /// The link to the device came up.
    Up,
    /// The link went down, whether requested or not.
    Down,
}

/// Callback invoked by a transport on link lifecycle changes.
///
/// Called from the transport's own task; it must not block.
pub type LinkObserver = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Characteristic-level access to one thermostat.
///
/// # Example
///
/// ```ignore
/// use eco2_core::{Transport, Result};
/// use eco2_types::uuid::{BATTERY_LEVEL, BATTERY_SERVICE};
///
/// async fn battery<T: Transport>(transport: &T) -> Result<u8> {
///     let value = transport.read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL).await?;
///     Ok(value.first().copied().unwrap_or(0))
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to the device at `address`.
    ///
    /// Succeeds only once the link is usable for characteristic access.
    async fn open_link(&mut self, address: &BleAddress) -> Result<()>;

    /// Request that the link be closed.
    ///
    /// The link may still be up when this returns; poll
    /// [`is_link_up`](Self::is_link_up) to confirm.
    async fn close_link(&mut self) -> Result<()>;

    /// Whether the link is currently up.
    async fn is_link_up(&self) -> bool;

    /// Read a characteristic value.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) if the link is down
    /// - [`Error::CharacteristicNotFound`](crate::Error::CharacteristicNotFound)
    /// - [`Error::AccessDenied`](crate::Error::AccessDenied) if it is not readable
    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic value, waiting for the device's response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) if the link is down
    /// - [`Error::CharacteristicNotFound`](crate::Error::CharacteristicNotFound)
    /// - [`Error::AccessDenied`](crate::Error::AccessDenied) if it is not writable
    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Register the callback for link lifecycle events, replacing any
    /// previous one.
    fn set_link_observer(&mut self, observer: LinkObserver);
}
