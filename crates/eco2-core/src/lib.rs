//! BLE driver for Danfoss eco2 electronic radiator thermostats.
//!
//! The eco2 keeps its name and temperatures in XXTEA-encrypted GATT
//! characteristics, unlocked by a four-digit PIN. This crate handles the
//! whole exchange for a single device:
//!
//! - **Session**: link setup, PIN authentication and value refresh as an
//!   explicit state machine ([`Session`])
//! - **Decryption**: the thermostat's word-swapped XXTEA variant ([`cipher`])
//! - **Transports**: btleplug for real hardware ([`BleTransport`]) and an
//!   in-memory device for tests ([`MockTransport`])
//! - **Key retrieval**: read the device key while the thermostat exposes it
//!
//! # Connection States
//!
//! | State | Meaning | Readings |
//! |-------|---------|----------|
//! | `Disconnected` | no link | defaults |
//! | `LinkUp` | link open, PIN not accepted | defaults |
//! | `Authenticated` | PIN accepted, no decoded data | defaults |
//! | `Ready` | all values decoded from the last refresh | valid |
//!
//! A link loss reported by the transport moves the session to
//! `Disconnected` immediately.
//!
//! # Platform Differences
//!
//! macOS does not expose Bluetooth hardware addresses, so a device can only
//! be found there if its CoreBluetooth identifier happens to parse as the
//! address. Linux and Windows match on the hardware address.
//!
//! # Quick Start
//!
//! ```no_run
//! use eco2_core::{BleTransport, Session, SessionConfig};
//! use eco2_types::EncryptionKey;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = EncryptionKey::from_hex("00112233445566778899aabbccddeeff")?;
//!     let mut session = Session::new("A1:B2:C3:D4:E5:F6", BleTransport::new(SessionConfig::default()))?;
//!
//!     session.connect_with_key(key.as_bytes()).await?;
//!     println!("{}: {:.1}°C, battery {}%", session.name(), session.temperature(), session.battery_level());
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod cipher;
pub mod config;
pub mod error;
pub mod mock;
pub mod session;
pub mod transport;
pub mod util;

pub use ble::BleTransport;
pub use cipher::{BlockCipher, CipherAdapter, CipherError, Xxtea, swap_word_order};
pub use config::SessionConfig;
pub use error::{Access, DeviceNotFoundReason, Error, ErrorKind, Result};
pub use mock::{MockTransport, MockTransportBuilder};
pub use session::{Session, SharedSession};
pub use transport::{LinkEvent, LinkObserver, Transport};

// Re-export types crate
pub use eco2_types::{
    BleAddress, ConnectionState, EncryptionKey, KEY_LEN, MAX_PAYLOAD_LEN, MAX_PIN, Payload, Pin,
    Reading,
};
pub use eco2_types::uuid;
