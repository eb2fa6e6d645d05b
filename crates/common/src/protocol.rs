//! Storage-level vocabulary shared by the library and the CLI.
//!
//! These names and tags appear in persisted documents and in schema
//! declarations, so changing any of them breaks existing data.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reserved document fields
// ---------------------------------------------------------------------------

/// Holds the aggregated-mode blob: `IV || ciphertext || tag`, base64 in JSON.
pub const AGGREGATED_CIPHER_FIELD: &str = "_ct";

/// Holds the side map of separated-mode ciphertexts, keyed by field name.
pub const SEPARATED_CIPHER_FIELD: &str = "_co";

/// Identity field. Never encrypted; skipped when walking nested records.
pub const ID_FIELD: &str = "_id";

/// Version-control field. Never encrypted; skipped when walking nested records.
pub const VERSION_FIELD: &str = "__v";

/// Byte length of the aggregated-mode IV (one AES block).
pub const IV_LEN: usize = 16;

/// Prefix of a separated ciphertext stored inline in its own field.
pub const INLINE_PREFIX: &str = "docseal:v1:";

/// Returns `true` for field names owned by this crate or by the host.
pub fn is_reserved_field(name: &str) -> bool {
    matches!(
        name,
        AGGREGATED_CIPHER_FIELD | SEPARATED_CIPHER_FIELD | ID_FIELD | VERSION_FIELD
    )
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Per-field encryption mode as written in schema declarations
/// (`encrypt: separated | aggregated`). Absence means plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Encrypted on its own, one ciphertext per field.
    Separated,
    /// Merged with the other aggregated fields into a single blob.
    Aggregated,
}

impl EncryptionMode {
    /// Parse the declaration tag used in schema extensions.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "separated" => Some(Self::Separated),
            "aggregated" => Some(Self::Aggregated),
            _ => None,
        }
    }
}

/// Where separated-mode ciphertexts are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeparatedStorage {
    /// In place: the field value becomes `docseal:v1:<base64>`.
    Inline,
    /// Out of place, in the [`SEPARATED_CIPHER_FIELD`] map.
    #[default]
    SideMap,
}
