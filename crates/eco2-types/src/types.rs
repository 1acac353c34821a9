//! Core types for eco2 thermostat data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ParseError, ParseResult};

/// Bluetooth hardware address of a thermostat.
///
/// Parsed from the canonical `XX:XX:XX:XX:XX:XX` form. Lowercase hex,
/// `-` separators and the bare 12-digit form are accepted on input;
/// [`Display`](fmt::Display) always renders uppercase with colons.
///
/// # Examples
///
/// ```
/// use eco2_types::BleAddress;
///
/// let address: BleAddress = "a1-b2-c3-d4-e5-f6".parse().unwrap();
/// assert_eq!(address.to_string(), "A1:B2:C3:D4:E5:F6");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress([u8; 6]);

impl BleAddress {
    /// Create an address from its six octets, most significant first.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The six address octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for BleAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidAddress(s.to_string());
        let trimmed = s.trim();

        let groups: Vec<&str> = if trimmed.contains(':') || trimmed.contains('-') {
            trimmed.split([':', '-']).collect()
        } else if trimmed.len() == 12 && trimmed.is_ascii() {
            (0..6).map(|i| &trimmed[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(invalid());
        };

        if groups.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, group) in octets.iter_mut().zip(groups) {
            if group.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

#[cfg(feature = "serde")]
impl Serialize for BleAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for BleAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Highest PIN the thermostat accepts.
pub const MAX_PIN: i32 = 9999;

/// Four-digit numeric PIN that unlocks data access on the thermostat.
///
/// Written to the device as a 32-bit big-endian integer, not as ASCII digits.
/// The factory default is `0000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "i32", into = "i32"))]
pub struct Pin(u16);

impl Pin {
    /// Validate and wrap a PIN value.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidPin`] unless `0 <= value <= 9999`.
    pub fn new(value: i32) -> ParseResult<Self> {
        if !(0..=MAX_PIN).contains(&value) {
            return Err(ParseError::InvalidPin(i64::from(value)));
        }
        // Range checked above.
        Ok(Self(value as u16))
    }

    /// Numeric PIN value.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// The 4-byte wire encoding written to the PIN characteristic.
    pub fn to_bytes(&self) -> [u8; 4] {
        u32::from(self.0).to_be_bytes()
    }
}

impl TryFrom<i32> for Pin {
    type Error = ParseError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Pin> for i32 {
    fn from(pin: Pin) -> Self {
        i32::from(pin.0)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Size of the per-device XXTEA key in bytes.
pub const KEY_LEN: usize = 16;

/// Per-device 16-byte symmetric key used to decrypt characteristic payloads.
///
/// The key bytes are wiped from memory when the value is dropped, and
/// [`Debug`](fmt::Debug) never prints them.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wrap a 16-byte key.
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of an arbitrary slice.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidKeyLength`] unless `bytes` is exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> ParseResult<Self> {
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ParseError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Parse a key from 32 hex digits.
    ///
    /// # Examples
    ///
    /// ```
    /// use eco2_types::EncryptionKey;
    ///
    /// let key = EncryptionKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
    /// assert_eq!(key.as_bytes()[15], 0x0f);
    /// ```
    pub fn from_hex(text: &str) -> ParseResult<Self> {
        let mut decoded =
            hex::decode(text.trim()).map_err(|e| ParseError::InvalidKeyHex(e.to_string()))?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }

    /// Lowercase hex rendering, for storing the key in host configuration.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Session connection state.
///
/// States are ordered by how far the session has progressed, so
/// `state.min(ConnectionState::Authenticated)` caps a session at
/// "authenticated, no trusted data".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// No link to the device.
    #[default]
    Disconnected,
    /// Transport link is up; the PIN has not been accepted yet.
    LinkUp,
    /// PIN accepted; no readings have been decoded.
    Authenticated,
    /// All readings decoded from the latest refresh.
    Ready,
}

impl ConnectionState {
    /// Whether readings in this state can be trusted.
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Whether a transport link is established.
    pub fn has_link(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::LinkUp => write!(f, "Link up"),
            ConnectionState::Authenticated => write!(f, "Authenticated"),
            ConnectionState::Ready => write!(f, "Ready"),
        }
    }
}

/// Minimum number of plaintext bytes in the temperature characteristic.
pub const MIN_TEMPERATURE_BYTES: usize = 2;

/// Minimum number of bytes in the battery level characteristic.
pub const MIN_BATTERY_BYTES: usize = 1;

/// Decode a half-degree fixed-point byte into degrees Celsius.
///
/// The byte is a signed count of half degrees.
///
/// # Examples
///
/// ```
/// use eco2_types::types::half_degrees_to_celsius;
///
/// assert_eq!(half_degrees_to_celsius(42), 21.0);
/// assert_eq!(half_degrees_to_celsius(45), 22.5);
/// ```
#[must_use]
pub fn half_degrees_to_celsius(raw: u8) -> f32 {
    f32::from(raw as i8) / 2.0
}

/// Decoded values from one successful refresh.
///
/// All fields come from the same refresh; a `Reading` is never assembled
/// from a mix of old and new characteristic values.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Display name configured on the thermostat.
    pub name: String,
    /// Ambient room temperature in degrees Celsius.
    pub temperature: f32,
    /// Target temperature currently in effect, in degrees Celsius.
    pub set_point_temperature: f32,
    /// Battery level percentage (0-100).
    pub battery: u8,
    /// When the reading was decoded.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub captured_at: Option<time::OffsetDateTime>,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            name: String::new(),
            temperature: 0.0,
            set_point_temperature: 0.0,
            battery: 0,
            captured_at: None,
        }
    }
}

impl Reading {
    /// Build a reading from the three decrypted/plaintext characteristic values.
    ///
    /// - `name`: decrypted name characteristic, NUL-terminated
    /// - `temperature`: decrypted temperature characteristic; byte 0 is the
    ///   set point and byte 1 the room temperature, both in half degrees
    /// - `battery`: plaintext battery level characteristic
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] if the temperature or
    /// battery payloads are too short.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_plaintext(name: &[u8], temperature: &[u8], battery: &[u8]) -> ParseResult<Self> {
        let name = decode_name(name);
        let (set_point_temperature, temperature) = decode_temperatures(temperature)?;
        let battery = decode_battery(battery)?;

        Ok(Self {
            name,
            temperature,
            set_point_temperature,
            battery,
            captured_at: None,
        })
    }

    /// Attach the capture time.
    #[must_use]
    pub fn captured_at(mut self, at: time::OffsetDateTime) -> Self {
        self.captured_at = Some(at);
        self
    }
}

/// Decode a NUL-terminated device name.
///
/// Bytes after the first NUL are padding and ignored. Invalid UTF-8 is
/// replaced rather than rejected.
pub fn decode_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Decode `(set_point, room)` temperatures from the temperature characteristic.
pub fn decode_temperatures(data: &[u8]) -> ParseResult<(f32, f32)> {
    use bytes::Buf;

    if data.len() < MIN_TEMPERATURE_BYTES {
        return Err(ParseError::InsufficientBytes {
            expected: MIN_TEMPERATURE_BYTES,
            actual: data.len(),
        });
    }

    let mut buf = data;
    let set_point = buf.get_u8();
    let room = buf.get_u8();
    Ok((
        half_degrees_to_celsius(set_point),
        half_degrees_to_celsius(room),
    ))
}

/// Decode the battery level percentage.
pub fn decode_battery(data: &[u8]) -> ParseResult<u8> {
    data.first().copied().ok_or(ParseError::InsufficientBytes {
        expected: MIN_BATTERY_BYTES,
        actual: 0,
    })
}
