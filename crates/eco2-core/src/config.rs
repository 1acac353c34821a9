//! Session timeouts and disconnect polling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time spent scanning for a peripheral that is not yet known.
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between "is the link closed yet" checks during disconnect.
const DEFAULT_DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Checks made before disconnect gives up waiting.
const DEFAULT_DISCONNECT_POLL_LIMIT: u32 = 50;

/// Configuration for session timeouts and disconnect behavior.
///
/// Serializes with durations as integer milliseconds so it can be embedded
/// in a host application's configuration file.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use eco2_core::SessionConfig;
///
/// // Thermostats mounted behind radiator covers often need longer timeouts
/// let config = SessionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .read_timeout(Duration::from_secs(15));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for establishing a BLE connection.
    #[serde(with = "millis")]
    pub connection_timeout: Duration,
    /// Timeout for BLE read operations.
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    /// Timeout for BLE write operations.
    #[serde(with = "millis")]
    pub write_timeout: Duration,
    /// Timeout for service discovery after connection.
    #[serde(with = "millis")]
    pub discovery_timeout: Duration,
    /// How long to scan for a peripheral the adapter has not seen yet.
    #[serde(with = "millis")]
    pub scan_timeout: Duration,
    /// Delay between link-closed checks in [`Session::disconnect`](crate::Session::disconnect).
    #[serde(with = "millis")]
    pub disconnect_poll_interval: Duration,
    /// Number of link-closed checks before disconnect reports a timeout.
    pub disconnect_poll_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            disconnect_poll_interval: DEFAULT_DISCONNECT_POLL_INTERVAL,
            disconnect_poll_limit: DEFAULT_DISCONNECT_POLL_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config for challenging RF environments.
    ///
    /// Radiator valves sit low on walls behind furniture and metal covers,
    /// so this uses longer timeouts and a longer disconnect wait.
    pub fn challenging_environment() -> Self {
        Self {
            connection_timeout: Duration::from_secs(25),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(15),
            scan_timeout: Duration::from_secs(20),
            disconnect_poll_interval: DEFAULT_DISCONNECT_POLL_INTERVAL,
            disconnect_poll_limit: 100,
        }
    }

    /// Create a config for fast, reliable environments.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(5),
            disconnect_poll_interval: Duration::from_millis(50),
            disconnect_poll_limit: 40,
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the peripheral scan timeout.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the disconnect poll interval.
    #[must_use]
    pub fn disconnect_poll_interval(mut self, interval: Duration) -> Self {
        self.disconnect_poll_interval = interval;
        self
    }

    /// Set how many times disconnect checks the link before giving up.
    #[must_use]
    pub fn disconnect_poll_limit(mut self, limit: u32) -> Self {
        self.disconnect_poll_limit = limit;
        self
    }

    /// Longest time [`Session::disconnect`](crate::Session::disconnect) waits
    /// for the link to close.
    pub fn disconnect_wait(&self) -> Duration {
        self.disconnect_poll_interval * self.disconnect_poll_limit
    }

    /// Check the configuration for values that would make a session unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any timeout is zero or the
    /// disconnect poll limit is zero.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connection_timeout", self.connection_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("disconnect_poll_interval", self.disconnect_poll_interval),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{} must be non-zero", name)));
            }
        }
        if self.disconnect_poll_limit == 0 {
            return Err(Error::invalid_config(
                "disconnect_poll_limit must be at least 1",
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
