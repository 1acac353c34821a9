//! Platform-agnostic types for Danfoss eco2 radiator thermostats.
//!
//! This crate provides the shared vocabulary used by `eco2-core`:
//!
//! - Identity and credentials: [`BleAddress`], [`Pin`], [`EncryptionKey`]
//! - Session state: [`ConnectionState`]
//! - Decoded values: [`Reading`]
//! - Bounded raw characteristic buffers: [`Payload`]
//! - UUID constants for every BLE service and characteristic
//! - Error types for parsing
//!
//! # Example
//!
//! ```
//! use eco2_types::{BleAddress, Pin};
//!
//! let address: BleAddress = "A1:B2:C3:D4:E5:F6".parse().unwrap();
//! let pin = Pin::new(1234).unwrap();
//! assert_eq!(pin.to_bytes(), [0x00, 0x00, 0x04, 0xD2]);
//! ```

pub mod error;
pub mod payload;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use payload::{MAX_PAYLOAD_LEN, Payload};
pub use types::{BleAddress, ConnectionState, EncryptionKey, KEY_LEN, MAX_PIN, Pin, Reading};
pub use uuid as uuids;
