//! Bounded buffer for raw characteristic values.

use core::fmt;

use zeroize::Zeroize;

use crate::error::{ParseError, ParseResult};

/// Largest attribute value the thermostat returns, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 20;

/// Raw bytes of one characteristic read.
///
/// Capacity is fixed at [`MAX_PAYLOAD_LEN`]; construction rejects empty
/// and oversize values. The buffer is wiped on drop since it may hold
/// decrypted data.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    buf: [u8; MAX_PAYLOAD_LEN],
    len: usize,
}

impl Payload {
    /// Copy a characteristic value into a bounded buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is empty or longer
    /// than [`MAX_PAYLOAD_LEN`].
    pub fn from_slice(data: &[u8]) -> ParseResult<Self> {
        if data.is_empty() {
            return Err(ParseError::MalformedPayload(
                "characteristic returned no data".to_string(),
            ));
        }
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(ParseError::MalformedPayload(format!(
                "{} bytes exceeds the {} byte attribute limit",
                data.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            buf,
            len: data.len(),
        })
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; empty payloads cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The valid bytes, mutably, for in-place transforms.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl TryFrom<&[u8]> for Payload {
    type Error = ParseError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(data)
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.len).finish()
    }
}
