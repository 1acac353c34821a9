//! Bluetooth UUIDs for Danfoss eco2 thermostats.
//!
//! Every service and characteristic the driver touches is declared here once.
//! They must match the device firmware exactly.

use uuid::{Uuid, uuid};

// --- Danfoss eco2 main service ---

/// Danfoss eco2 main service UUID.
pub const MAIN_SERVICE: Uuid = uuid!("10020000-2749-0001-0000-00805f9b042f");

/// PIN code characteristic (write-only, 4 bytes).
pub const PIN: Uuid = uuid!("10020001-2749-0001-0000-00805f9b042f");

/// Temperature characteristic (encrypted): set point and room temperature.
pub const TEMPERATURE: Uuid = uuid!("10020005-2749-0001-0000-00805f9b042f");

/// Device name characteristic (encrypted).
pub const NAME: Uuid = uuid!("10020006-2749-0001-0000-00805f9b042f");

/// Secret key characteristic (plaintext).
///
/// Only readable while the device is exposing its key, which the user
/// triggers with the button on the thermostat.
pub const SECRET_KEY: Uuid = uuid!("1002000b-2749-0001-0000-00805f9b042f");

// --- Standard BLE services ---

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// A characteristic together with the service that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    /// Service UUID.
    pub service: Uuid,
    /// Characteristic UUID.
    pub characteristic: Uuid,
}

impl CharacteristicId {
    /// Pair a service with one of its characteristics.
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl core::fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// Authentication PIN slot.
pub const PIN_CHARACTERISTIC: CharacteristicId = CharacteristicId::new(MAIN_SERVICE, PIN);

/// Encrypted device name slot.
pub const NAME_CHARACTERISTIC: CharacteristicId = CharacteristicId::new(MAIN_SERVICE, NAME);

/// Encrypted temperature slot.
pub const TEMPERATURE_CHARACTERISTIC: CharacteristicId =
    CharacteristicId::new(MAIN_SERVICE, TEMPERATURE);

/// Plaintext secret key slot.
pub const SECRET_KEY_CHARACTERISTIC: CharacteristicId =
    CharacteristicId::new(MAIN_SERVICE, SECRET_KEY);

/// Plaintext battery level slot.
pub const BATTERY_CHARACTERISTIC: CharacteristicId =
    CharacteristicId::new(BATTERY_SERVICE, BATTERY_LEVEL);
