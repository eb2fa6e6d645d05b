//! Aggregated-mode codec: one blob for the union of all aggregated fields.
//!
//! The object is serialised to canonical JSON, encrypted with AES-256-CBC
//! under a fresh random IV, and authenticated with HMAC-SHA256 over
//! `IV || ciphertext` (encrypt-then-MAC). The MAC key is derived from the
//! aggregated key with HKDF, so a single 256-bit key is configured.
//!
//! ```text
//! IV (16) || CBC ciphertext (n * 16) || tag (32)
//! ```

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use common::protocol::IV_LEN;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use super::{derive_subkey, CipherError, KEY_LEN};
use crate::keys::SecretKey;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Byte length of the HMAC-SHA256 tag.
pub const TAG_LEN: usize = 32;

const BLOCK_LEN: usize = 16;
const MAC_INFO: &[u8] = b"docseal/aggregated-mac/v1";

/// Smallest valid blob: IV, one padded block, tag.
pub const MIN_BLOB_LEN: usize = IV_LEN + BLOCK_LEN + TAG_LEN;

/// Encrypts and decrypts whole field maps.
pub struct AggregatedCipher {
    key: SecretKey,
    mac_key: SecretKey,
}

impl AggregatedCipher {
    /// Build the codec from the aggregated key.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] unless `key` is [`KEY_LEN`] bytes.
    pub fn new(key: &SecretKey) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                got: key.len(),
            });
        }
        let mac_key = derive_subkey(key.as_bytes(), MAC_INFO)?;
        Ok(Self {
            key: key.clone(),
            mac_key,
        })
    }

    /// Encrypt `object` under `iv`, returning `IV || ciphertext || tag`.
    ///
    /// The IV must be fresh for every call; see [`super::generate_iv`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Serialize`] if the object cannot be serialised.
    pub fn seal(&self, iv: &[u8; IV_LEN], object: &Map<String, Value>) -> Result<Vec<u8>, CipherError> {
        let plaintext =
            serde_json::to_vec(object).map_err(|e| CipherError::Serialize(e.to_string()))?;

        let ciphertext = Aes256CbcEnc::new_from_slices(self.key.as_bytes(), iv)
            .map_err(|_| CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                got: self.key.len(),
            })?
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let tag = self.mac(iv, &ciphertext)?.finalize().into_bytes();

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len() + TAG_LEN);
        blob.extend_from_slice(iv);
        blob.extend_from_slice(&ciphertext);
        blob.extend_from_slice(&tag);
        Ok(blob)
    }

    /// Verify and decrypt a blob produced by [`AggregatedCipher::seal`].
    ///
    /// Fully synchronous. The tag is checked before any decryption, so any
    /// modified byte fails with [`CipherError::TagMismatch`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::TooShort`], [`CipherError::TagMismatch`],
    /// [`CipherError::Padding`] or [`CipherError::Parse`].
    pub fn open(&self, blob: &[u8]) -> Result<Map<String, Value>, CipherError> {
        if blob.len() < MIN_BLOB_LEN {
            return Err(CipherError::TooShort(blob.len()));
        }
        let (iv, rest) = blob.split_at(IV_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        self.mac(iv, ciphertext)?
            .verify_slice(tag)
            .map_err(|_| CipherError::TagMismatch)?;

        let plaintext = Aes256CbcDec::new_from_slices(self.key.as_bytes(), iv)
            .map_err(|_| CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                got: self.key.len(),
            })?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::Padding)?;

        match serde_json::from_slice(&plaintext) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(CipherError::Parse(format!(
                "expected an object, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(CipherError::Parse(e.to_string())),
        }
    }

    fn mac(&self, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CipherError> {
        let mut mac = HmacSha256::new_from_slice(self.mac_key.as_bytes()).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: KEY_LEN,
                got: self.mac_key.len(),
            }
        })?;
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac)
    }
}

impl std::fmt::Debug for AggregatedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AggregatedCipher([REDACTED])")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> AggregatedCipher {
        AggregatedCipher::new(&SecretKey::from_bytes(vec![0x42; KEY_LEN])).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => unreachable!("test helper expects an object"),
        }
    }

    #[test]
    fn seal_open_round_trip() {
        let c = cipher();
        let obj = object(json!({"profile": {"income": 50000, "notes": "ok"}, "tags": ["a", "b"]}));
        let blob = c.seal(&[9u8; IV_LEN], &obj).unwrap();
        assert_eq!(&blob[..IV_LEN], &[9u8; IV_LEN]);
        assert_eq!(c.open(&blob).unwrap(), obj);
    }

    #[test]
    fn empty_object_round_trip() {
        let c = cipher();
        let blob = c.seal(&[0u8; IV_LEN], &Map::new()).unwrap();
        assert_eq!(blob.len(), MIN_BLOB_LEN);
        assert!(c.open(&blob).unwrap().is_empty());
    }

    #[test]
    fn every_flipped_byte_is_detected() {
        let c = cipher();
        let obj = object(json!({"ssn": "123-45-6789"}));
        let blob = c.seal(&[1u8; IV_LEN], &obj).unwrap();
        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert!(c.open(&tampered).is_err(), "flip at byte {i} went undetected");
        }
    }

    #[test]
    fn short_blob_rejected() {
        assert!(matches!(
            cipher().open(&[0u8; IV_LEN]),
            Err(CipherError::TooShort(16))
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let blob = cipher().seal(&[3u8; IV_LEN], &Map::new()).unwrap();
        let other = AggregatedCipher::new(&SecretKey::from_bytes(vec![0x43; KEY_LEN])).unwrap();
        assert!(matches!(other.open(&blob), Err(CipherError::TagMismatch)));
    }

    #[test]
    fn wrong_key_length_rejected() {
        assert!(AggregatedCipher::new(&SecretKey::from_bytes(vec![0u8; 16])).is_err());
    }
}
