//! Field encryption primitives for both modes.
//!
//! This module is intentionally free of schema and record dependencies.
//! It provides the low-level codecs used by the document controller.
//!
//! # Ciphertext formats
//!
//! ```text
//! separated:  AES-256-GCM-SIV(ciphertext+tag), fixed nonce
//!             inline text form: docseal:v1:<base64(ciphertext+tag)>
//! aggregated: IV(16) || AES-256-CBC/PKCS#7 ciphertext || HMAC-SHA256 tag(32)
//! ```

pub mod aggregated;
pub mod entropy;
pub mod separated;

pub use aggregated::AggregatedCipher;
pub use entropy::{generate_iv, EntropyError, EntropySource, OsEntropy};
pub use separated::SeparatedCipher;

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

use crate::keys::SecretKey;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"docseal";

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key has the wrong length for the cipher.
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// HKDF expansion failed.
    #[error("key derivation failed")]
    KeyDerivation,

    /// AES-GCM-SIV encryption or decryption failed (wrong key or tampered data).
    #[error("aead operation failed")]
    AeadFailure,

    /// The blob is shorter than the minimum aggregated layout.
    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    /// The authentication tag does not match.
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// PKCS#7 padding was invalid after CBC decryption.
    #[error("invalid padding")]
    Padding,

    /// The stored text form is not a valid ciphertext encoding.
    #[error("invalid ciphertext encoding: {0}")]
    InvalidFormat(String),

    /// The value could not be serialised to its canonical text form.
    #[error("serialisation failed: {0}")]
    Serialize(String),

    /// The decrypted text is not a valid canonical serialisation.
    #[error("decrypted text is not valid JSON: {0}")]
    Parse(String),
}

/// Derive a [`KEY_LEN`]-byte subkey from `ikm` with HKDF-SHA256.
pub(crate) fn derive_subkey(ikm: &[u8], info: &[u8]) -> Result<SecretKey, CipherError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm);
    let mut out = vec![0u8; KEY_LEN];
    hk.expand(info, &mut out)
        .map_err(|_| CipherError::KeyDerivation)?;
    Ok(SecretKey::from_bytes(out))
}
