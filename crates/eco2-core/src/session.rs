//! Authenticated session with one eco2 thermostat.
//!
//! A [`Session`] drives the device protocol over any [`Transport`]:
//!
//! 1. open the link
//! 2. write the PIN to the PIN characteristic
//! 3. read the name, temperature and battery characteristics, decrypting the
//!    first two with the device key
//!
//! Readings are only exposed while the session is
//! [`Ready`](ConnectionState::Ready). Any failure discards them, so a caller
//! never sees a mix of values from different refreshes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::time::sleep;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use eco2_types::uuid::{
    BATTERY_CHARACTERISTIC, CharacteristicId, NAME_CHARACTERISTIC, PIN_CHARACTERISTIC,
    SECRET_KEY_CHARACTERISTIC, TEMPERATURE_CHARACTERISTIC,
};
use eco2_types::{BleAddress, ConnectionState, EncryptionKey, Payload, Pin, Reading};

use crate::cipher::{BlockCipher, CipherAdapter, CipherError, Xxtea};
use crate::config::SessionConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::transport::{LinkEvent, LinkObserver, Transport};

/// A session shared between tasks.
///
/// The lock is held for a whole connect or refresh, which keeps the
/// multi-step protocol from interleaving.
pub type SharedSession<T, C = Xxtea> = Arc<tokio::sync::Mutex<Session<T, C>>>;

/// Connection to a single thermostat.
///
/// # Cleanup
///
/// Call [`Session::disconnect`] before dropping the session. Dropping a
/// connected session logs a warning and leaves the link to the transport.
///
/// # Example
///
/// ```no_run
/// use eco2_core::{BleTransport, Session, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let key = eco2_types::EncryptionKey::from_hex("00112233445566778899aabbccddeeff")?;
///     let transport = BleTransport::new(SessionConfig::default());
///     let mut session = Session::new("A1:B2:C3:D4:E5:F6", transport)?;
///
///     session.set_pin(1234)?;
///     session.connect_with_key(key.as_bytes()).await?;
///     println!("{}", session.describe());
///
///     session.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct Session<T: Transport, C: BlockCipher = Xxtea> {
    address: BleAddress,
    transport: T,
    cipher: CipherAdapter<C>,
    config: SessionConfig,
    pin: Pin,
    key: Option<EncryptionKey>,
    state: ConnectionState,
    /// Present exactly when `state` is `Ready`.
    reading: Option<Reading>,
    /// Set by the link observer when the transport reports the link down.
    link_lost: Arc<AtomicBool>,
    user_observer: Arc<RwLock<Option<LinkObserver>>>,
}

impl<T: Transport, C: BlockCipher> std::fmt::Debug for Session<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("reading", &self.reading())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T, Xxtea> {
    /// Create a session for the device at `address` with default timeouts.
    ///
    /// No Bluetooth traffic happens until [`connect_with_key`](Self::connect_with_key).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `address` is not a valid
    /// Bluetooth address.
    pub fn new(address: &str, transport: T) -> Result<Self> {
        Self::with_config(address, transport, SessionConfig::default())
    }

    /// Create a session with custom timeouts.
    pub fn with_config(address: &str, transport: T, config: SessionConfig) -> Result<Self> {
        Self::with_cipher(address, transport, config, Xxtea::new())
    }
}

impl<T: Transport, C: BlockCipher> Session<T, C> {
    /// Create a session with a custom block cipher primitive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a bad address or
    /// [`Error::InvalidConfig`] for an unusable configuration.
    pub fn with_cipher(
        address: &str,
        mut transport: T,
        config: SessionConfig,
        cipher: C,
    ) -> Result<Self> {
        let address: BleAddress = address.parse()?;
        config.validate()?;

        let link_lost = Arc::new(AtomicBool::new(false));
        let user_observer: Arc<RwLock<Option<LinkObserver>>> = Arc::new(RwLock::new(None));

        let lost = Arc::clone(&link_lost);
        let forward = Arc::clone(&user_observer);
        transport.set_link_observer(Arc::new(move |event: LinkEvent| {
            if event == LinkEvent::Down {
                lost.store(true, Ordering::SeqCst);
            }
            let callback = forward.read().ok().and_then(|guard| guard.clone());
            if let Some(callback) = callback {
                callback(event);
            }
        }));

        Ok(Self {
            address,
            transport,
            cipher: CipherAdapter::with_cipher(cipher),
            config,
            pin: Pin::default(),
            key: None,
            state: ConnectionState::Disconnected,
            reading: None,
            link_lost,
            user_observer,
        })
    }

    /// Wrap the session for sharing across tasks.
    pub fn into_shared(self) -> SharedSession<T, C> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Register a callback for link up/down events.
    ///
    /// The session reacts to a link loss on its own; this is for callers
    /// that want to schedule a reconnect.
    pub fn on_link_event<F>(&self, callback: F)
    where
        F: Fn(LinkEvent) + Send + Sync + 'static,
    {
        let callback: LinkObserver = Arc::new(callback);
        match self.user_observer.write() {
            Ok(mut guard) => *guard = Some(callback),
            Err(poisoned) => *poisoned.into_inner() = Some(callback),
        }
    }

    /// Set the PIN used by the next [`connect_with_key`](Self::connect_with_key).
    ///
    /// An already authenticated link is not affected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] unless `0 <= pin <= 9999`.
    pub fn set_pin(&mut self, pin: i32) -> Result<()> {
        self.pin = Pin::new(pin)?;
        Ok(())
    }

    /// The PIN that will be written on the next connect.
    pub fn pin(&self) -> Pin {
        self.pin
    }

    /// Connect, authenticate with the PIN and read all values.
    ///
    /// Succeeds only if the session ends up [`Ready`](ConnectionState::Ready).
    /// Calling it on a session whose link is already up skips the link open
    /// and re-sends the PIN, which is how a rejected PIN is retried.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `key` is not 16 bytes; nothing is sent
    /// - a transport error if the link cannot be opened; state stays `Disconnected`
    /// - [`Error::AuthenticationRejected`] if the device refuses the PIN; state `LinkUp`
    /// - any [`refresh`](Self::refresh) error; state `Authenticated`
    ///
    /// If the link drops during the PIN write or the reads, the state is
    /// `Disconnected` and the key is wiped.
    #[tracing::instrument(level = "info", skip_all, fields(address = %self.address))]
    pub async fn connect_with_key(&mut self, key: &[u8]) -> Result<()> {
        let key = EncryptionKey::from_slice(key)?;
        self.sync_link_state();

        if !self.state.has_link() || !self.transport.is_link_up().await {
            self.reset(ConnectionState::Disconnected);
            info!("Opening link...");
            if let Err(e) = self.transport.open_link(&self.address).await {
                warn!("Failed to open link: {}", e);
                return Err(e);
            }
            self.link_lost.store(false, Ordering::SeqCst);
            self.state = ConnectionState::LinkUp;
            info!("Link up");
        }

        self.key = Some(key);
        self.authenticate().await?;
        self.refresh().await
    }

    async fn authenticate(&mut self) -> Result<()> {
        let result = self
            .transport
            .write_characteristic(
                PIN_CHARACTERISTIC.service,
                PIN_CHARACTERISTIC.characteristic,
                &self.pin.to_bytes(),
            )
            .await;

        match result {
            Ok(()) => {
                debug!("PIN accepted");
                self.state = ConnectionState::Authenticated;
                Ok(())
            }
            Err(e) => {
                warn!("PIN write failed: {}", e);
                if self.link_gone(&e).await {
                    self.forget_link();
                } else {
                    self.reset(ConnectionState::LinkUp);
                }
                if e.is_refusal() {
                    Err(Error::AuthenticationRejected(e.to_string()))
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Re-read all values from the device.
    ///
    /// Reads the name, temperature and battery characteristics in that
    /// order and stops at the first failure. On failure every reading is
    /// reset and the state drops to at most `Authenticated`, or to
    /// `Disconnected` if the failure was the link going down. On success
    /// all readings are replaced together and the state becomes `Ready`.
    #[tracing::instrument(level = "debug", skip_all, fields(address = %self.address))]
    pub async fn refresh(&mut self) -> Result<()> {
        self.sync_link_state();

        match self.read_all().await {
            Ok(reading) => {
                info!(
                    name = %reading.name,
                    temperature = reading.temperature,
                    battery = reading.battery,
                    "Refreshed readings"
                );
                self.reading = Some(reading);
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("Refresh failed: {}", e);
                if self.link_gone(&e).await {
                    self.forget_link();
                } else {
                    self.reset(self.state.min(ConnectionState::Authenticated));
                }
                Err(e)
            }
        }
    }

    async fn read_all(&mut self) -> Result<Reading> {
        match self.state {
            ConnectionState::Disconnected => return Err(Error::NotConnected),
            ConnectionState::LinkUp => {
                return Err(Error::AuthenticationRejected(
                    "PIN has not been accepted on this link".to_string(),
                ));
            }
            ConnectionState::Authenticated | ConnectionState::Ready => {}
        }

        let key = self
            .key
            .as_ref()
            .ok_or_else(|| CipherError::KeySetup("no key installed".to_string()))?;

        let mut name = self.read_payload(NAME_CHARACTERISTIC).await?;
        self.cipher.decrypt_payload(&mut name, key)?;

        let mut temperature = self.read_payload(TEMPERATURE_CHARACTERISTIC).await?;
        self.cipher.decrypt_payload(&mut temperature, key)?;

        let battery = self.read_payload(BATTERY_CHARACTERISTIC).await?;

        let reading = Reading::from_plaintext(
            name.as_slice(),
            temperature.as_slice(),
            battery.as_slice(),
        )?;
        Ok(reading.captured_at(time::OffsetDateTime::now_utc()))
    }

    async fn read_payload(&self, id: CharacteristicId) -> Result<Payload> {
        let value = self
            .transport
            .read_characteristic(id.service, id.characteristic)
            .await?;
        debug!("Read {} bytes from {}", value.len(), id.characteristic);
        Ok(Payload::from_slice(&value)?)
    }

    /// Read the device key from the secret key characteristic.
    ///
    /// The thermostat only exposes its key for a short window after its
    /// button is pressed. Requires an open link; the PIN is not needed.
    /// The returned key is not installed; pass it to
    /// [`connect_with_key`](Self::connect_with_key).
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a link
    /// - [`Error::AuthenticationRejected`] if the device is not exposing its key
    /// - [`Error::MalformedPayload`] if the value is not 16 bytes
    #[tracing::instrument(level = "info", skip_all, fields(address = %self.address))]
    pub async fn retrieve_key(&mut self) -> Result<EncryptionKey> {
        self.sync_link_state();
        if !self.state.has_link() {
            return Err(Error::NotConnected);
        }

        let mut value = self
            .transport
            .read_characteristic(
                SECRET_KEY_CHARACTERISTIC.service,
                SECRET_KEY_CHARACTERISTIC.characteristic,
            )
            .await
            .map_err(|e| {
                if e.is_refusal() {
                    Error::AuthenticationRejected(format!(
                        "device is not exposing its key ({}); press the thermostat button and retry",
                        e
                    ))
                } else {
                    e
                }
            })?;

        let key = EncryptionKey::from_slice(&value).map_err(|_| {
            Error::malformed(format!(
                "secret key characteristic returned {} bytes",
                value.len()
            ))
        });
        value.zeroize();
        if key.is_ok() {
            info!("Retrieved device key");
        }
        key
    }

    /// Close the link and wait until the transport confirms it is down.
    ///
    /// Readings, state and the key are cleared before the link is released.
    /// The wait is bounded by [`SessionConfig::disconnect_wait`].
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the close request fails, or
    /// [`Error::Timeout`] if the link is still up after the last poll. The
    /// session is `Disconnected` either way.
    #[tracing::instrument(level = "info", skip_all, fields(address = %self.address))]
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from device...");
        self.forget_link();

        self.transport.close_link().await?;
        self.wait_for_link_down().await?;

        self.link_lost.store(false, Ordering::SeqCst);
        info!("Disconnected");
        Ok(())
    }

    async fn wait_for_link_down(&self) -> Result<()> {
        for _ in 0..self.config.disconnect_poll_limit {
            if !self.transport.is_link_up().await {
                return Ok(());
            }
            sleep(self.config.disconnect_poll_interval).await;
        }

        warn!(
            "Link still up after {} checks",
            self.config.disconnect_poll_limit
        );
        Err(Error::timeout(
            "confirm link closed",
            self.config.disconnect_wait(),
        ))
    }

    /// Adopt a link loss reported by the transport.
    fn sync_link_state(&mut self) {
        if self.link_lost.swap(false, Ordering::SeqCst) {
            warn!("Link to {} was lost", self.address);
            self.forget_link();
        }
    }

    /// Whether `error` came from the link dropping underneath an operation.
    async fn link_gone(&self, error: &Error) -> bool {
        error.kind() == ErrorKind::TransportUnavailable && !self.transport.is_link_up().await
    }

    fn forget_link(&mut self) {
        self.reset(ConnectionState::Disconnected);
        self.key = None;
    }

    fn reset(&mut self, state: ConnectionState) {
        self.reading = None;
        self.state = state;
    }

    // --- Accessors ---

    /// Current state, accounting for a link loss not yet acted on.
    pub fn state(&self) -> ConnectionState {
        if self.link_lost.load(Ordering::SeqCst) {
            ConnectionState::Disconnected
        } else {
            self.state
        }
    }

    /// Whether the readings are trustworthy.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// The complete set of values from the last successful refresh.
    pub fn reading(&self) -> Option<&Reading> {
        if self.is_ready() {
            self.reading.as_ref()
        } else {
            None
        }
    }

    /// Device name, or `""` when not ready.
    pub fn name(&self) -> &str {
        self.reading().map(|r| r.name.as_str()).unwrap_or_default()
    }

    /// Battery level percentage, or `0` when not ready.
    pub fn battery_level(&self) -> u8 {
        self.reading().map(|r| r.battery).unwrap_or_default()
    }

    /// Room temperature in °C, or `0.0` when not ready.
    pub fn temperature(&self) -> f32 {
        self.reading().map(|r| r.temperature).unwrap_or_default()
    }

    /// Set-point temperature in °C, or `0.0` when not ready.
    pub fn set_point_temperature(&self) -> f32 {
        self.reading()
            .map(|r| r.set_point_temperature)
            .unwrap_or_default()
    }

    /// The key in use while the link is up.
    pub fn key(&self) -> Option<&EncryptionKey> {
        self.key.as_ref().filter(|_| self.state().has_link())
    }

    /// The device address.
    pub fn address(&self) -> &BleAddress {
        &self.address
    }

    /// The session's timeouts.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One-line human-readable status.
    ///
    /// ```text
    /// Device 'A1:B2:C3:D4:E5:F6' is disconnected.
    /// Device 'A1:B2:C3:D4:E5:F6' is reachable, but no data available. Please check PIN code and encryption key.
    /// Device 'Living Room (A1:B2:C3:D4:E5:F6)' is reporting room temperature 22.0C and remaining battery level is 77%.
    /// ```
    pub fn describe(&self) -> String {
        match (self.state(), self.reading()) {
            (ConnectionState::Disconnected, _) => {
                format!("Device '{}' is disconnected.", self.address)
            }
            (_, Some(reading)) => format!(
                "Device '{} ({})' is reporting room temperature {:.1}C and remaining battery level is {}%.",
                reading.name, self.address, reading.temperature, reading.battery
            ),
            (_, None) => format!(
                "Device '{}' is reachable, but no data available. Please check PIN code and encryption key.",
                self.address
            ),
        }
    }
}

impl<T: Transport, C: BlockCipher> std::fmt::Display for Session<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl<T: Transport, C: BlockCipher> Drop for Session<T, C> {
    fn drop(&mut self) {
        if self.state().has_link() {
            warn!(
                device_address = %self.address,
                "Session dropped without calling disconnect(). \
                 For reliable cleanup, call session.disconnect().await before dropping."
            );
        }
    }
}
