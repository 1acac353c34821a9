//! Characteristic payload decryption.
//!
//! The thermostat encrypts its name and temperature characteristics with
//! XXTEA under a per-device 16-byte key. The device and the cipher disagree
//! about word byte order, so every 4-byte group is reversed before the
//! block operation and reversed again after it:
//!
//! ```text
//! wire bytes -> swap_word_order -> XXTEA decrypt -> swap_word_order -> plaintext
//! ```
//!
//! [`BlockCipher`] is the seam for the raw primitive; [`Xxtea`] is the
//! implementation the thermostat uses. [`CipherAdapter`] wraps a primitive
//! with the byte-order handling and length checks.

use bytes::{Buf, BufMut};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use eco2_types::{EncryptionKey, KEY_LEN, Payload};

use crate::error::{Error, Result};

/// Block cipher word size in bytes.
pub const WORD_LEN: usize = 4;

/// Errors reported by a [`BlockCipher`] primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CipherError {
    /// The key could not be installed into the key schedule.
    #[error("key setup failed: {0}")]
    KeySetup(String),

    /// The block decrypt operation failed.
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    /// The block encrypt operation failed.
    #[error("encrypt failed: {0}")]
    Encrypt(String),
}

/// Raw block cipher operating in place on 32-bit-word-aligned buffers.
pub trait BlockCipher: Send + Sync {
    /// Install a key into the cipher's key schedule.
    fn install_key(&mut self, key: &[u8]) -> std::result::Result<(), CipherError>;

    /// Decrypt `data` in place. `data.len()` is a multiple of [`WORD_LEN`].
    fn decrypt_words(&self, data: &mut [u8]) -> std::result::Result<(), CipherError>;

    /// Encrypt `data` in place. `data.len()` is a multiple of [`WORD_LEN`].
    fn encrypt_words(&self, data: &mut [u8]) -> std::result::Result<(), CipherError>;

    /// Wipe the installed key. Block operations fail until the next
    /// [`install_key`](Self::install_key).
    fn clear_key(&mut self);
}

const DELTA: u32 = 0x9E37_79B9;

/// XXTEA (Corrected Block TEA) with little-endian 32-bit words.
///
/// Requires at least two words of data. The installed key is wiped on drop.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct Xxtea {
    key: Option<[u32; 4]>,
}

impl Xxtea {
    /// Create a cipher with no key installed.
    pub fn new() -> Self {
        Self::default()
    }

    fn schedule(&self) -> std::result::Result<&[u32; 4], CipherError> {
        self.key
            .as_ref()
            .ok_or_else(|| CipherError::KeySetup("no key installed".to_string()))
    }

    fn load_words(data: &[u8]) -> Vec<u32> {
        let mut buf = data;
        let mut words = Vec::with_capacity(data.len() / WORD_LEN);
        while buf.remaining() >= WORD_LEN {
            words.push(buf.get_u32_le());
        }
        words
    }

    fn store_words(words: &mut Vec<u32>, data: &mut [u8]) {
        let mut out = data;
        for word in words.iter() {
            out.put_u32_le(*word);
        }
        words.zeroize();
    }

    fn check_len(data: &[u8]) -> Option<String> {
        if data.len() % WORD_LEN != 0 {
            return Some(format!("{} bytes is not word aligned", data.len()));
        }
        if data.len() < 2 * WORD_LEN {
            return Some(format!(
                "{} bytes is too short, XXTEA needs at least {}",
                data.len(),
                2 * WORD_LEN
            ));
        }
        None
    }
}

#[inline]
fn mx(sum: u32, y: u32, z: u32, p: usize, e: usize, k: &[u32; 4]) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(k[(p & 3) ^ e] ^ z))
}

impl BlockCipher for Xxtea {
    fn install_key(&mut self, key: &[u8]) -> std::result::Result<(), CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::KeySetup(format!(
                "expected {} byte key, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let mut words = Self::load_words(key);
        let mut schedule = [0u32; 4];
        schedule.copy_from_slice(&words);
        words.zeroize();
        self.key = Some(schedule);
        Ok(())
    }

    fn decrypt_words(&self, data: &mut [u8]) -> std::result::Result<(), CipherError> {
        let k = self.schedule()?;
        if let Some(reason) = Self::check_len(data) {
            return Err(CipherError::Decrypt(reason));
        }

        let mut v = Self::load_words(data);
        let n = v.len();
        let rounds = 6 + 52 / n as u32;
        let mut sum = rounds.wrapping_mul(DELTA);
        let mut y = v[0];

        for _ in 0..rounds {
            let e = ((sum >> 2) & 3) as usize;
            for p in (1..n).rev() {
                let z = v[p - 1];
                v[p] = v[p].wrapping_sub(mx(sum, y, z, p, e, k));
                y = v[p];
            }
            let z = v[n - 1];
            v[0] = v[0].wrapping_sub(mx(sum, y, z, 0, e, k));
            y = v[0];
            sum = sum.wrapping_sub(DELTA);
        }

        Self::store_words(&mut v, data);
        Ok(())
    }

    fn encrypt_words(&self, data: &mut [u8]) -> std::result::Result<(), CipherError> {
        let k = self.schedule()?;
        if let Some(reason) = Self::check_len(data) {
            return Err(CipherError::Encrypt(reason));
        }

        let mut v = Self::load_words(data);
        let n = v.len();
        let rounds = 6 + 52 / n as u32;
        let mut sum = 0u32;
        let mut z = v[n - 1];

        for _ in 0..rounds {
            sum = sum.wrapping_add(DELTA);
            let e = ((sum >> 2) & 3) as usize;
            for p in 0..n - 1 {
                let y = v[p + 1];
                v[p] = v[p].wrapping_add(mx(sum, y, z, p, e, k));
                z = v[p];
            }
            let y = v[0];
            v[n - 1] = v[n - 1].wrapping_add(mx(sum, y, z, n - 1, e, k));
            z = v[n - 1];
        }

        Self::store_words(&mut v, data);
        Ok(())
    }

    fn clear_key(&mut self) {
        self.key.zeroize();
    }
}

/// Reverse the byte order of every 4-byte group in place.
///
/// Byte `4k + j` moves to `4k + (3 - j)`. Applying it twice is the identity.
/// A trailing partial group is left untouched.
///
/// # Examples
///
/// ```
/// use eco2_core::cipher::swap_word_order;
///
/// let mut data = [1, 2, 3, 4, 5, 6, 7, 8];
/// swap_word_order(&mut data);
/// assert_eq!(data, [4, 3, 2, 1, 8, 7, 6, 5]);
/// ```
pub fn swap_word_order(data: &mut [u8]) {
    for word in data.chunks_exact_mut(WORD_LEN) {
        word.reverse();
    }
}

/// Wraps a [`BlockCipher`] with the thermostat's byte-order convention.
///
/// The key is installed for the duration of one call and wiped from the
/// primitive before the call returns, whether it succeeded or not.
#[derive(Default)]
pub struct CipherAdapter<C: BlockCipher = Xxtea> {
    cipher: C,
}

impl CipherAdapter<Xxtea> {
    /// Adapter over [`Xxtea`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: BlockCipher> CipherAdapter<C> {
    /// Adapter over a custom primitive.
    pub fn with_cipher(cipher: C) -> Self {
        Self { cipher }
    }

    /// Decrypt a characteristic value in place.
    ///
    /// On error the buffer contents are unspecified.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedPayload`] if `data` is empty or not a multiple of 4 bytes
    /// - [`Error::Cipher`] with [`CipherError::KeySetup`] if the key is rejected
    /// - [`Error::Cipher`] with [`CipherError::Decrypt`] if the primitive fails
    pub fn decrypt(&mut self, data: &mut [u8], key: &EncryptionKey) -> Result<()> {
        self.transform(data, key, C::decrypt_words)
    }

    /// Encrypt a value in place the way the thermostat does.
    ///
    /// The inverse of [`decrypt`](Self::decrypt).
    pub fn encrypt(&mut self, data: &mut [u8], key: &EncryptionKey) -> Result<()> {
        self.transform(data, key, C::encrypt_words)
    }

    /// Decrypt a bounded characteristic payload in place.
    pub fn decrypt_payload(&mut self, payload: &mut Payload, key: &EncryptionKey) -> Result<()> {
        self.decrypt(payload.as_mut_slice(), key)
    }

    /// The wrapped primitive.
    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    fn transform(
        &mut self,
        data: &mut [u8],
        key: &EncryptionKey,
        block_op: fn(&C, &mut [u8]) -> std::result::Result<(), CipherError>,
    ) -> Result<()> {
        check_alignment(data)?;
        let result = self.cipher.install_key(key.as_bytes()).and_then(|()| {
            swap_word_order(data);
            let result = block_op(&self.cipher, data);
            swap_word_order(data);
            result
        });
        self.cipher.clear_key();
        result.map_err(Error::from)
    }
}

fn check_alignment(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() % WORD_LEN != 0 {
        return Err(Error::malformed(format!(
            "encrypted value of {} bytes is not a positive multiple of {}",
            data.len(),
            WORD_LEN
        )));
    }
    Ok(())
}
