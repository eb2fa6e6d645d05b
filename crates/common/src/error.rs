//! Common error types shared across crates.

use thiserror::Error;

/// Record identifier reported when a failing record carries no `_id`.
pub const UNKNOWN_RECORD: &str = "unknown";

/// Top-level error type for every sealing and opening operation.
///
/// Variants map to process exit codes returned by the CLI:
/// - [`CryptError::Config`] → 78 (`EX_CONFIG`)
/// - [`CryptError::KeyMaterial`] → 75 (`EX_TEMPFAIL`)
/// - [`CryptError::Decode`] → 65 (`EX_DATAERR`)
/// - [`CryptError::Encrypt`] → 70 (`EX_SOFTWARE`)
#[derive(Debug, Error)]
pub enum CryptError {
    /// Missing or malformed key material, or an illegal field declaration.
    /// Raised at setup and never recovered.
    #[error("configuration error: {0}")]
    Config(String),

    /// The entropy source failed while generating an IV.
    #[error("key material error: {0}")]
    KeyMaterial(String),

    /// Stored ciphertext could not be decrypted or its plaintext could not be
    /// parsed. Indicates corruption or a key mismatch.
    #[error("failed to decode field `{field}` of record {record_id}: {cause}")]
    Decode {
        /// Identifier of the record, or [`UNKNOWN_RECORD`].
        record_id: String,
        /// Field (or reserved cipher field) that failed.
        field: String,
        /// Underlying cause.
        cause: String,
    },

    /// A value could not be serialised or encrypted.
    #[error("failed to encrypt field `{field}`: {cause}")]
    Encrypt {
        /// Field (or reserved cipher field) being produced.
        field: String,
        /// Underlying cause.
        cause: String,
    },
}

impl CryptError {
    /// Build a [`CryptError::Decode`], substituting [`UNKNOWN_RECORD`] when no
    /// identifier is available.
    pub fn decode(
        record_id: Option<&str>,
        field: impl Into<String>,
        cause: impl ToString,
    ) -> Self {
        CryptError::Decode {
            record_id: record_id.unwrap_or(UNKNOWN_RECORD).to_owned(),
            field: field.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns the process exit code that should be used for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CryptError::Config(_) => 78,
            CryptError::KeyMaterial(_) => 75,
            CryptError::Decode { .. } => 65,
            CryptError::Encrypt { .. } => 70,
        }
    }
}
