//! In-memory thermostat for testing.
//!
//! [`MockTransport`] implements [`Transport`] against a simulated GATT
//! table holding the same characteristics a real eco2 exposes, with the
//! name and temperature values encrypted under the device key. It can be
//! handed to a [`Session`](crate::Session) in place of
//! [`BleTransport`](crate::BleTransport).
//!
//! # Features
//!
//! - **Shared handle**: clones share state, so a test keeps one clone to
//!   steer the device after moving another into a session
//! - **Failure injection**: refuse reads or writes per characteristic,
//!   fail link setup, lose the link, or never confirm a close
//! - **Call counters**: verify that validation happens before any I/O

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use eco2_types::uuid::{
    BATTERY_CHARACTERISTIC, CharacteristicId, NAME_CHARACTERISTIC, PIN_CHARACTERISTIC,
    SECRET_KEY_CHARACTERISTIC, TEMPERATURE_CHARACTERISTIC,
};
use eco2_types::{BleAddress, EncryptionKey, KEY_LEN, MAX_PAYLOAD_LEN, Pin};

use crate::cipher::{CipherAdapter, WORD_LEN};
use crate::error::{Access, DeviceNotFoundReason, Error, Result};
use crate::transport::{LinkEvent, LinkObserver, Transport};

/// Key used by [`MockTransportBuilder`] unless overridden.
pub const MOCK_KEY: [u8; KEY_LEN] = [
    0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
];

#[derive(Debug, Clone)]
struct MockCharacteristic {
    value: Vec<u8>,
    /// `value` is plaintext, encrypted under the device key on every read.
    sealed: bool,
    readable: bool,
    writable: bool,
}

struct MockState {
    key: RwLock<EncryptionKey>,
    characteristics: RwLock<HashMap<(Uuid, Uuid), MockCharacteristic>>,
    written: RwLock<Vec<(Uuid, Vec<u8>)>>,
    expected_pin: RwLock<Option<Pin>>,
    observer: StdRwLock<Option<LinkObserver>>,
    linked_address: StdRwLock<Option<BleAddress>>,
    link_up: AtomicBool,
    open_should_fail: AtomicBool,
    close_confirms: AtomicBool,
    open_count: AtomicU32,
    close_count: AtomicU32,
    io_count: AtomicU32,
}

/// A simulated eco2 thermostat.
///
/// # Example
///
/// ```
/// use eco2_core::{MockTransport, Session};
/// use eco2_core::mock::MOCK_KEY;
///
/// #[tokio::main]
/// async fn main() {
///     let device = MockTransport::builder().name("Bedroom").room_temperature(40).build();
///     let mut session = Session::new("A1:B2:C3:D4:E5:F6", device.clone()).unwrap();
///
///     session.connect_with_key(&MOCK_KEY).await.unwrap();
///     assert_eq!(session.name(), "Bedroom");
///     assert_eq!(session.temperature(), 20.0);
///
///     session.disconnect().await.unwrap();
///     assert_eq!(device.open_count(), 1);
/// }
/// ```
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("link_up", &self.state.link_up.load(Ordering::Relaxed))
            .field("open_count", &self.open_count())
            .field("close_count", &self.close_count())
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransportBuilder::default().build()
    }
}

impl MockTransport {
    /// Create a device with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a device with custom values.
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::new()
    }

    fn notify(&self, event: LinkEvent) {
        let observer = self
            .state
            .observer
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(observer) = observer {
            observer(event);
        }
    }

    fn check_link(&self) -> Result<()> {
        self.state.io_count.fetch_add(1, Ordering::Relaxed);
        if self.state.link_up.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn update(&self, id: CharacteristicId, f: impl FnOnce(&mut MockCharacteristic)) {
        let mut table = self.state.characteristics.write().await;
        if let Some(entry) = table.get_mut(&(id.service, id.characteristic)) {
            f(entry);
        }
    }

    // --- Failure injection ---

    /// Allow or refuse reads of a characteristic.
    pub async fn set_readable(&self, id: CharacteristicId, readable: bool) {
        self.update(id, |c| c.readable = readable).await;
    }

    /// Allow or refuse writes to a characteristic.
    pub async fn set_writable(&self, id: CharacteristicId, writable: bool) {
        self.update(id, |c| c.writable = writable).await;
    }

    /// Replace a characteristic's raw (already encrypted, if applicable) value.
    pub async fn set_raw_value(&self, id: CharacteristicId, value: Vec<u8>) {
        self.update(id, |c| {
            c.value = value;
            c.sealed = false;
        })
        .await;
    }

    async fn set_sealed_value(&self, id: CharacteristicId, plaintext: Vec<u8>) {
        self.update(id, |c| {
            c.value = plaintext;
            c.sealed = true;
        })
        .await;
    }

    /// Remove a characteristic from the GATT table.
    pub async fn remove_characteristic(&self, id: CharacteristicId) {
        self.state
            .characteristics
            .write()
            .await
            .remove(&(id.service, id.characteristic));
    }

    /// Make the next link opens fail (or succeed again).
    pub fn set_open_should_fail(&self, fail: bool) {
        self.state.open_should_fail.store(fail, Ordering::Relaxed);
    }

    /// Control whether [`close_link`](Transport::close_link) actually takes
    /// the link down.
    pub fn set_close_confirms(&self, confirms: bool) {
        self.state.close_confirms.store(confirms, Ordering::Relaxed);
    }

    /// Require this PIN; any other PIN write is refused.
    pub async fn set_expected_pin(&self, pin: Option<Pin>) {
        *self.state.expected_pin.write().await = pin;
    }

    /// Drop the link as if the device went out of range, notifying the
    /// link observer.
    pub fn simulate_link_loss(&self) {
        self.state.link_up.store(false, Ordering::Relaxed);
        self.notify(LinkEvent::Down);
    }

    /// Drop the link without notifying anyone.
    pub fn drop_link_silently(&self) {
        self.state.link_up.store(false, Ordering::Relaxed);
    }

    // --- Device values ---

    /// Set the device name, encrypting it under the device key.
    pub async fn set_name(&self, name: &str) {
        self.set_sealed_value(NAME_CHARACTERISTIC, name_plaintext(name))
            .await;
    }

    /// Set both temperatures in raw half degrees, encrypting them under the
    /// device key.
    pub async fn set_temperatures(&self, set_point_raw: u8, room_raw: u8) {
        self.set_sealed_value(
            TEMPERATURE_CHARACTERISTIC,
            temperature_plaintext(set_point_raw, room_raw),
        )
        .await;
    }

    /// Set the battery level percentage.
    pub async fn set_battery(&self, level: u8) {
        self.set_raw_value(BATTERY_CHARACTERISTIC, vec![level]).await;
    }

    /// Expose (or hide) the device key on the secret key characteristic.
    pub async fn expose_key(&self, exposed: bool) {
        self.set_readable(SECRET_KEY_CHARACTERISTIC, exposed).await;
    }

    // --- Inspection ---

    /// Number of [`open_link`](Transport::open_link) calls.
    pub fn open_count(&self) -> u32 {
        self.state.open_count.load(Ordering::Relaxed)
    }

    /// Number of [`close_link`](Transport::close_link) calls.
    pub fn close_count(&self) -> u32 {
        self.state.close_count.load(Ordering::Relaxed)
    }

    /// Number of characteristic reads and writes attempted.
    pub fn io_count(&self) -> u32 {
        self.state.io_count.load(Ordering::Relaxed)
    }

    /// Every successful write, in order, as `(characteristic, value)`.
    pub async fn written_values(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state.written.read().await.clone()
    }

    /// The address of the most recent successful link open.
    pub fn linked_address(&self) -> Option<BleAddress> {
        self.state
            .linked_address
            .read()
            .ok()
            .and_then(|guard| *guard)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_link(&mut self, address: &BleAddress) -> Result<()> {
        self.state.open_count.fetch_add(1, Ordering::Relaxed);
        if self.state.open_should_fail.load(Ordering::Relaxed) {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::NotFound {
                address: address.to_string(),
                scanned: Duration::ZERO,
            }));
        }

        if let Ok(mut linked) = self.state.linked_address.write() {
            *linked = Some(*address);
        }
        self.state.link_up.store(true, Ordering::Relaxed);
        self.notify(LinkEvent::Up);
        Ok(())
    }

    async fn close_link(&mut self) -> Result<()> {
        self.state.close_count.fetch_add(1, Ordering::Relaxed);
        if self.state.close_confirms.load(Ordering::Relaxed)
            && self.state.link_up.swap(false, Ordering::Relaxed)
        {
            self.notify(LinkEvent::Down);
        }
        Ok(())
    }

    async fn is_link_up(&self) -> bool {
        self.state.link_up.load(Ordering::Relaxed)
    }

    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        self.check_link()?;
        let table = self.state.characteristics.read().await;
        let entry = table
            .get(&(service, characteristic))
            .ok_or_else(|| Error::characteristic_not_found(service, characteristic))?;
        if !entry.readable {
            return Err(Error::AccessDenied {
                uuid: characteristic,
                access: Access::Read,
            });
        }
        if entry.sealed {
            let key = self.state.key.read().await;
            return encrypt_value(&entry.value, &key);
        }
        Ok(entry.value.clone())
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.check_link()?;
        {
            let table = self.state.characteristics.read().await;
            let entry = table
                .get(&(service, characteristic))
                .ok_or_else(|| Error::characteristic_not_found(service, characteristic))?;
            if !entry.writable {
                return Err(Error::AccessDenied {
                    uuid: characteristic,
                    access: Access::Write,
                });
            }
        }

        if characteristic == PIN_CHARACTERISTIC.characteristic
            && let Some(expected) = *self.state.expected_pin.read().await
            && value != expected.to_bytes().as_slice()
        {
            return Err(Error::AccessDenied {
                uuid: characteristic,
                access: Access::Write,
            });
        }

        self.state
            .written
            .write()
            .await
            .push((characteristic, value.to_vec()));
        Ok(())
    }

    fn set_link_observer(&mut self, observer: LinkObserver) {
        match self.state.observer.write() {
            Ok(mut guard) => *guard = Some(observer),
            Err(poisoned) => *poisoned.into_inner() = Some(observer),
        }
    }
}

/// Encrypt a value the way the thermostat stores it.
///
/// The plaintext is zero-padded to a whole number of words and at least two
/// words.
///
/// # Errors
///
/// Returns the cipher's error if the value cannot be encrypted.
pub fn encrypt_value(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let padded_len = plaintext.len().div_ceil(WORD_LEN).max(2) * WORD_LEN;
    let mut value = plaintext.to_vec();
    value.resize(padded_len, 0);
    CipherAdapter::new().encrypt(&mut value, key)?;
    Ok(value)
}

fn name_plaintext(name: &str) -> Vec<u8> {
    let mut value: Vec<u8> = name.bytes().take(MAX_PAYLOAD_LEN - 1).collect();
    value.push(0);
    value
}

fn temperature_plaintext(set_point_raw: u8, room_raw: u8) -> Vec<u8> {
    vec![set_point_raw, room_raw, 0, 0, 0, 0, 0, 0]
}

/// Builder for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    name: String,
    set_point_raw: u8,
    room_temperature_raw: u8,
    battery: u8,
    key: [u8; KEY_LEN],
    expected_pin: Option<Pin>,
    key_exposed: bool,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            name: "Living Room".to_string(),
            set_point_raw: 42,
            room_temperature_raw: 44,
            battery: 77,
            key: MOCK_KEY,
            expected_pin: None,
            key_exposed: false,
        }
    }
}

impl MockTransportBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the room temperature in raw half degrees.
    #[must_use]
    pub fn room_temperature(mut self, raw: u8) -> Self {
        self.room_temperature_raw = raw;
        self
    }

    /// Set the set-point temperature in raw half degrees.
    #[must_use]
    pub fn set_point(mut self, raw: u8) -> Self {
        self.set_point_raw = raw;
        self
    }

    /// Set the battery level percentage.
    #[must_use]
    pub fn battery(mut self, level: u8) -> Self {
        self.battery = level;
        self
    }

    /// Set the device key.
    #[must_use]
    pub fn key(mut self, key: [u8; KEY_LEN]) -> Self {
        self.key = key;
        self
    }

    /// Require a PIN.
    #[must_use]
    pub fn pin(mut self, pin: Pin) -> Self {
        self.expected_pin = Some(pin);
        self
    }

    /// Make the secret key characteristic readable.
    #[must_use]
    pub fn expose_key(mut self, exposed: bool) -> Self {
        self.key_exposed = exposed;
        self
    }

    /// Build the mock device with its link down.
    #[must_use]
    pub fn build(self) -> MockTransport {
        let key = EncryptionKey::new(self.key);
        let entry = |value: Vec<u8>, readable: bool, writable: bool| MockCharacteristic {
            value,
            sealed: false,
            readable,
            writable,
        };
        let sealed = |plaintext: Vec<u8>| MockCharacteristic {
            value: plaintext,
            sealed: true,
            readable: true,
            writable: false,
        };

        let mut table = HashMap::new();
        let mut insert = |id: CharacteristicId, c: MockCharacteristic| {
            table.insert((id.service, id.characteristic), c);
        };
        insert(PIN_CHARACTERISTIC, entry(Vec::new(), false, true));
        insert(NAME_CHARACTERISTIC, sealed(name_plaintext(&self.name)));
        insert(
            TEMPERATURE_CHARACTERISTIC,
            sealed(temperature_plaintext(
                self.set_point_raw,
                self.room_temperature_raw,
            )),
        );
        insert(BATTERY_CHARACTERISTIC, entry(vec![self.battery], true, false));
        insert(
            SECRET_KEY_CHARACTERISTIC,
            entry(self.key.to_vec(), self.key_exposed, false),
        );

        MockTransport {
            state: Arc::new(MockState {
                key: RwLock::new(key),
                characteristics: RwLock::new(table),
                written: RwLock::new(Vec::new()),
                expected_pin: RwLock::new(self.expected_pin),
                observer: StdRwLock::new(None),
                linked_address: StdRwLock::new(None),
                link_up: AtomicBool::new(false),
                open_should_fail: AtomicBool::new(false),
                close_confirms: AtomicBool::new(true),
                open_count: AtomicU32::new(0),
                close_count: AtomicU32::new(0),
                io_count: AtomicU32::new(0),
            }),
        }
    }
}

/// Unit tests for MockTransport and MockTransportBuilder.
///
/// Session behavior over the mock is covered in `tests/session.rs`.
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use eco2_types::uuid::{BATTERY_LEVEL, BATTERY_SERVICE, MAIN_SERVICE, NAME, PIN, TEMPERATURE};

    fn address() -> BleAddress {
        "A1:B2:C3:D4:E5:F6".parse().unwrap()
    }

    #[tokio::test]
    async fn test_mock_link_lifecycle() {
        let mut device = MockTransport::new();
        assert!(!device.is_link_up().await);

        device.open_link(&address()).await.unwrap();
        assert!(device.is_link_up().await);
        assert_eq!(device.linked_address(), Some(address()));

        device.close_link().await.unwrap();
        assert!(!device.is_link_up().await);
        assert_eq!(device.open_count(), 1);
        assert_eq!(device.close_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_io_requires_link() {
        let device = MockTransport::new();
        let err = device
            .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(device.io_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_values_are_encrypted() {
        let mut device = MockTransport::builder().name("Hall").build();
        device.open_link(&address()).await.unwrap();

        let raw = device.read_characteristic(MAIN_SERVICE, NAME).await.unwrap();
        assert_eq!(raw.len(), 8);
        assert_ne!(&raw[..4], b"Hall");

        let mut plain = raw.clone();
        CipherAdapter::new()
            .decrypt(&mut plain, &EncryptionKey::new(MOCK_KEY))
            .unwrap();
        assert_eq!(&plain[..5], b"Hall\0");

        let battery = device
            .read_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
            .await
            .unwrap();
        assert_eq!(battery, vec![77]);
    }

    #[tokio::test]
    async fn test_mock_access_control() {
        let mut device = MockTransport::new();
        device.open_link(&address()).await.unwrap();

        let err = device.read_characteristic(MAIN_SERVICE, PIN).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AccessDenied {
                access: Access::Read,
                ..
            }
        ));

        device.set_writable(PIN_CHARACTERISTIC, false).await;
        let err = device
            .write_characteristic(MAIN_SERVICE, PIN, &[0, 0, 0, 0])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AccessDenied {
                access: Access::Write,
                ..
            }
        ));

        device.remove_characteristic(NAME_CHARACTERISTIC).await;
        let err = device.read_characteristic(MAIN_SERVICE, NAME).await.unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mock_expected_pin() {
        let pin = Pin::new(1234).unwrap();
        let mut device = MockTransport::builder().pin(pin).build();
        device.open_link(&address()).await.unwrap();

        assert!(
            device
                .write_characteristic(MAIN_SERVICE, PIN, &[0, 0, 0, 0])
                .await
                .is_err()
        );
        device
            .write_characteristic(MAIN_SERVICE, PIN, &pin.to_bytes())
            .await
            .unwrap();
        assert_eq!(
            device.written_values().await,
            vec![(PIN, vec![0x00, 0x00, 0x04, 0xD2])]
        );
    }

    #[tokio::test]
    async fn test_mock_link_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let mut device = MockTransport::new();
        device.set_link_observer(Arc::new(move |event: LinkEvent| {
            sink.lock().unwrap().push(event)
        }));

        device.open_link(&address()).await.unwrap();
        device.simulate_link_loss();
        device.open_link(&address()).await.unwrap();
        device.drop_link_silently();

        assert_eq!(
            *events.lock().unwrap(),
            vec![LinkEvent::Up, LinkEvent::Down, LinkEvent::Up]
        );
    }

    #[tokio::test]
    async fn test_mock_close_without_confirmation() {
        let mut device = MockTransport::new();
        device.open_link(&address()).await.unwrap();
        device.set_close_confirms(false);
        device.close_link().await.unwrap();
        assert!(device.is_link_up().await);
    }

    #[tokio::test]
    async fn test_mock_open_failure() {
        let mut device = MockTransport::new();
        device.set_open_should_fail(true);
        let err = device.open_link(&address()).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(!device.is_link_up().await);
    }

    #[test]
    fn test_encrypt_value_pads() {
        let key = EncryptionKey::new(MOCK_KEY);
        assert_eq!(encrypt_value(&[1], &key).unwrap().len(), 8);
        assert_eq!(encrypt_value(&[1; 9], &key).unwrap().len(), 12);
        assert_eq!(encrypt_value(&[1; 20], &key).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_sealed_values_match_encrypt_value() {
        let mut device = MockTransport::new();
        device.open_link(&address()).await.unwrap();
        device.set_temperatures(46, 39).await;

        let raw = device
            .read_characteristic(MAIN_SERVICE, TEMPERATURE)
            .await
            .unwrap();
        let expected =
            encrypt_value(&temperature_plaintext(46, 39), &EncryptionKey::new(MOCK_KEY)).unwrap();
        assert_eq!(raw, expected);

        device
            .set_raw_value(TEMPERATURE_CHARACTERISTIC, vec![9; 8])
            .await;
        let raw = device
            .read_characteristic(MAIN_SERVICE, TEMPERATURE)
            .await
            .unwrap();
        assert_eq!(raw, vec![9; 8]);
    }

    #[test]
    fn test_long_names_fit_one_attribute() {
        let plain = name_plaintext("A very long radiator name indeed");
        assert_eq!(plain.len(), MAX_PAYLOAD_LEN);
        assert_eq!(plain.last(), Some(&0));
    }
}
