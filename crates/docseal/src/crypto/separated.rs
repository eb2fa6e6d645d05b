//! Separated-mode codec: one ciphertext per field value.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) under a fixed nonce. No
//! per-value nonce is stored, so identical plaintext + key always produces the
//! same ciphertext. Because GCM-SIV derives its CTR starting block from the
//! plaintext, distinct values never share a keystream, and every ciphertext
//! carries an authentication tag.
//!
//! Equality of two separated ciphertexts still reveals equality of the
//! plaintexts. Use aggregated mode for values where that matters.

use aes_gcm_siv::{
    aead::{Aead, KeyInit},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::protocol::INLINE_PREFIX;
use serde_json::Value;

use super::{derive_subkey, CipherError, KEY_LEN};
use crate::keys::SecretKey;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

const FIXED_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];
const SUBKEY_INFO: &[u8] = b"docseal/separated/v1";

/// Encrypts and decrypts individual field values.
pub struct SeparatedCipher {
    cipher: Aes256GcmSiv,
}

impl SeparatedCipher {
    /// Build the codec from the separated key. The cipher key is derived with
    /// HKDF-SHA256, so the configured key may have any non-zero length.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] if `key` is empty.
    pub fn new(key: &SecretKey) -> Result<Self, CipherError> {
        if key.is_empty() {
            return Err(CipherError::InvalidKeyLength {
                expected: 1,
                got: 0,
            });
        }
        let derived = derive_subkey(key.as_bytes(), SUBKEY_INFO)?;
        let cipher = Aes256GcmSiv::new_from_slice(derived.as_bytes()).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                got: derived.len(),
            }
        })?;
        Ok(Self { cipher })
    }

    /// Serialise `value` to canonical JSON and encrypt it.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Serialize`] or [`CipherError::AeadFailure`].
    pub fn encrypt(&self, value: &Value) -> Result<Vec<u8>, CipherError> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CipherError::Serialize(e.to_string()))?;
        self.cipher
            .encrypt(Nonce::from_slice(&FIXED_NONCE), plaintext.as_slice())
            .map_err(|_| CipherError::AeadFailure)
    }

    /// Decrypt a ciphertext produced by [`SeparatedCipher::encrypt`].
    ///
    /// Fully synchronous: no I/O and no randomness.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::AeadFailure`] if authentication fails (wrong key
    /// or tampered data) and [`CipherError::Parse`] if the plaintext is not JSON.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Value, CipherError> {
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&FIXED_NONCE), ciphertext)
            .map_err(|_| CipherError::AeadFailure)?;
        serde_json::from_slice(&plaintext).map_err(|e| CipherError::Parse(e.to_string()))
    }
}

impl std::fmt::Debug for SeparatedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SeparatedCipher([REDACTED])")
    }
}

/// Encode a ciphertext for in-place storage in its own field.
pub fn to_inline(ciphertext: &[u8]) -> String {
    format!("{INLINE_PREFIX}{}", STANDARD.encode(ciphertext))
}

/// Decode an inline ciphertext. Returns `None` when `text` does not carry the
/// inline prefix, i.e. it is an ordinary plaintext string.
pub fn from_inline(text: &str) -> Option<Result<Vec<u8>, CipherError>> {
    let encoded = text.strip_prefix(INLINE_PREFIX)?;
    Some(
        STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::InvalidFormat(e.to_string())),
    )
}
