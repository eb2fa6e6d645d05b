//! Process-wide key material for both encryption modes.
//!
//! Keys are decoded once from base64 configuration and are immutable for the
//! lifetime of the process. Share them with `Arc<KeyMaterial>`.
//!
//! # Security invariants
//!
//! - Key bytes are **never** logged or included in `Debug` output.
//! - Key buffers are overwritten with zeroes on drop.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::CryptError;

use crate::crypto::{EntropySource, OsEntropy, KEY_LEN};

/// Owned key bytes that are wiped on drop.
#[derive(Clone)]
pub struct SecretKey(Box<[u8]>);

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }

    /// Decode a base64 key. `name` identifies the setting in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if the string is empty or not valid base64.
    pub fn from_base64(encoded: &str, name: &str) -> Result<Self, CryptError> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(CryptError::Config(format!(
                "{name} is required as a base64 string"
            )));
        }
        let bytes = STANDARD
            .decode(trimmed)
            .map_err(|e| CryptError::Config(format!("{name} is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(CryptError::Config(format!("{name} decodes to zero bytes")));
        }
        Ok(Self::from_bytes(bytes))
    }

    /// Generate `len` random bytes from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::KeyMaterial`] if the entropy source fails.
    pub fn generate(len: usize) -> Result<Self, CryptError> {
        let mut buf = vec![0u8; len];
        OsEntropy
            .fill(&mut buf)
            .map_err(|e| CryptError::KeyMaterial(e.to_string()))?;
        Ok(Self::from_bytes(buf))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the key holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode the key as standard base64, the configuration format.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// The two independent keys used by the codecs.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    /// Key for separated-mode encryption. Any non-zero length.
    pub separated: SecretKey,
    /// Key for aggregated-mode encryption. Exactly [`KEY_LEN`] bytes.
    pub aggregated: SecretKey,
}

impl KeyMaterial {
    /// Decode both keys from their base64 configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if either key is missing or malformed, or
    /// if the aggregated key is not exactly [`KEY_LEN`] bytes.
    pub fn from_base64(separated: &str, aggregated: &str) -> Result<Self, CryptError> {
        let separated = SecretKey::from_base64(separated, "separated key")?;
        let aggregated = SecretKey::from_base64(aggregated, "aggregated key")?;
        if aggregated.len() != KEY_LEN {
            return Err(CryptError::Config(format!(
                "aggregated key must decode to {KEY_LEN} bytes, got {}",
                aggregated.len()
            )));
        }
        Ok(Self {
            separated,
            aggregated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn accepts_valid_keys() {
        let keys = KeyMaterial::from_base64(&b64(b"short separated key"), &b64(&[7u8; KEY_LEN]))
            .unwrap();
        assert_eq!(keys.aggregated.len(), KEY_LEN);
        assert_eq!(keys.separated.as_bytes(), b"short separated key");
    }

    #[test]
    fn rejects_missing_separated_key() {
        let err = KeyMaterial::from_base64("", &b64(&[7u8; KEY_LEN])).unwrap_err();
        assert!(matches!(err, CryptError::Config(_)));
    }

    #[test]
    fn rejects_short_aggregated_key() {
        let err = KeyMaterial::from_base64(&b64(b"k"), &b64(&[7u8; 16])).unwrap_err();
        assert!(err.to_string().contains("32 bytes"), "{err}");
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(KeyMaterial::from_base64("!!not base64!!", &b64(&[7u8; KEY_LEN])).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let a = SecretKey::generate(KEY_LEN).unwrap();
        let b = SecretKey::generate(KEY_LEN).unwrap();
        assert_eq!(a.len(), KEY_LEN);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn base64_round_trip() {
        let key = SecretKey::generate(KEY_LEN).unwrap();
        let decoded = SecretKey::from_base64(&key.to_base64(), "k").unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn secret_key_redacted_in_debug() {
        let key = SecretKey::from_bytes(vec![0xFF; 4]);
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
