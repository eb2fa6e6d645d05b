//! [`DocumentCrypto`]: orchestrates both codecs over a record.
//!
//! # Encrypt
//!
//! Present values of separated and aggregated fields are snapshotted, both
//! codecs run concurrently, and only when both succeed are the ciphertexts
//! written and the plaintext fields cleared. A failure leaves the record
//! exactly as it was, so a record is never persisted half-encrypted.
//!
//! A record loaded through a projection only rewrites the ciphertext holders
//! it loaded. Changing a field whose holder (`_ct`, or `_co` in side-map
//! storage) was not loaded is an error, as the rewritten holder would drop
//! every value the projection left out.
//!
//! # Decrypt
//!
//! Synchronous, with no hidden suspension: hosts call it while constructing
//! records. All plaintext is staged before anything is written back, so a
//! [`CryptError::Decode`] leaves the ciphertext in place.

use std::sync::Arc;

use common::{
    protocol::{AGGREGATED_CIPHER_FIELD, ID_FIELD, SEPARATED_CIPHER_FIELD, VERSION_FIELD},
    CryptError, SeparatedStorage,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::crypto::{
    generate_iv,
    separated::{from_inline, to_inline},
    AggregatedCipher, CipherError, EntropySource, SeparatedCipher,
};
use crate::keys::KeyMaterial;
use crate::record::Record;
use crate::schema::FieldClassification;

/// Per-schema crypto controller. Created by
/// [`Schema::with_encryption`](crate::schema::Schema::with_encryption).
pub struct DocumentCrypto {
    classification: FieldClassification,
    separated: SeparatedCipher,
    aggregated: AggregatedCipher,
    storage: SeparatedStorage,
    entropy: Arc<dyn EntropySource>,
}

impl DocumentCrypto {
    pub(crate) fn new(
        classification: FieldClassification,
        keys: &KeyMaterial,
        storage: SeparatedStorage,
        entropy: Arc<dyn EntropySource>,
    ) -> Result<Self, CryptError> {
        let separated = SeparatedCipher::new(&keys.separated)
            .map_err(|e| CryptError::Config(format!("separated key: {e}")))?;
        let aggregated = AggregatedCipher::new(&keys.aggregated)
            .map_err(|e| CryptError::Config(format!("aggregated key: {e}")))?;
        Ok(Self {
            classification,
            separated,
            aggregated,
            storage,
            entropy,
        })
    }

    pub fn classification(&self) -> &FieldClassification {
        &self.classification
    }

    pub fn storage(&self) -> SeparatedStorage {
        self.storage
    }

    /// Reserved fields this controller writes: `_ct` when aggregated fields
    /// exist, `_co` when separated fields exist and are stored in a side map.
    pub fn reserved_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.classification.aggregated().is_empty() {
            out.push(AGGREGATED_CIPHER_FIELD);
        }
        if !self.classification.separated().is_empty() && self.storage == SeparatedStorage::SideMap
        {
            out.push(SEPARATED_CIPHER_FIELD);
        }
        out
    }

    /// Encrypt every present separated and aggregated field of `record`.
    ///
    /// A record that already holds ciphertext is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first error of either path: [`CryptError::KeyMaterial`] if
    /// no IV could be drawn, [`CryptError::Encrypt`] if a value could not be
    /// encrypted or its holder was not loaded. The record is unchanged on error.
    pub async fn encrypt(&self, record: &mut Record) -> Result<(), CryptError> {
        let record_id = record.id();
        if record.is_sealed() {
            warn!(record_id = ?record_id, "record already holds ciphertext; skipping encryption");
            return Ok(());
        }

        let separated_values: Vec<(String, Value)> = self
            .classification
            .separated()
            .iter()
            .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        let aggregated_values: Map<String, Value> = self
            .classification
            .aggregated()
            .iter()
            .filter_map(|f| record.get(f).map(|v| (f.clone(), v.clone())))
            .collect();

        let side_map_loaded = self.storage == SeparatedStorage::Inline
            || record.is_selected(SEPARATED_CIPHER_FIELD);
        let blob_loaded = record.is_selected(AGGREGATED_CIPHER_FIELD);

        let (separated, aggregated) = tokio::try_join!(
            async { self.seal_separated(&separated_values, side_map_loaded) },
            self.seal_aggregated(&aggregated_values, blob_loaded),
        )?;

        let separated_count = separated.len();
        for (field, ciphertext) in separated {
            record.remove(&field);
            match self.storage {
                SeparatedStorage::Inline => record.set_inline_cipher(field, to_inline(&ciphertext)),
                SeparatedStorage::SideMap => record.insert_separated_cipher(field, ciphertext),
            }
        }
        if let Some(blob) = aggregated {
            for field in aggregated_values.keys() {
                record.remove(field);
            }
            record.set_aggregated_cipher(blob);
        }

        debug!(
            record_id = ?record_id,
            separated = separated_count,
            aggregated = aggregated_values.len(),
            "record encrypted"
        );
        Ok(())
    }

    fn seal_separated(
        &self,
        values: &[(String, Value)],
        side_map_loaded: bool,
    ) -> Result<Vec<(String, Vec<u8>)>, CryptError> {
        if let (false, Some((field, _))) = (side_map_loaded, values.first()) {
            return Err(unloaded_holder(field, SEPARATED_CIPHER_FIELD));
        }
        values
            .iter()
            .map(|(field, value)| {
                self.separated
                    .encrypt(value)
                    .map(|ciphertext| (field.clone(), ciphertext))
                    .map_err(|e| CryptError::Encrypt {
                        field: field.clone(),
                        cause: e.to_string(),
                    })
            })
            .collect()
    }

    async fn seal_aggregated(
        &self,
        values: &Map<String, Value>,
        blob_loaded: bool,
    ) -> Result<Option<Vec<u8>>, CryptError> {
        if self.classification.aggregated().is_empty() {
            return Ok(None);
        }
        if !blob_loaded {
            return match values.keys().next() {
                Some(field) => Err(unloaded_holder(field, AGGREGATED_CIPHER_FIELD)),
                None => Ok(None),
            };
        }
        let iv = generate_iv(self.entropy.clone()).await?;
        self.aggregated
            .seal(&iv, values)
            .map(Some)
            .map_err(|e| CryptError::Encrypt {
                field: AGGREGATED_CIPHER_FIELD.to_owned(),
                cause: e.to_string(),
            })
    }

    /// Restore plaintext from every ciphertext the record holds and clear the
    /// ciphertext holders. A record without ciphertext is left untouched.
    ///
    /// Both separated storage forms are read regardless of the configured one.
    /// Only values known to be inline ciphertext are decoded; a plaintext
    /// value that happens to carry the inline prefix is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Decode`] naming the record and field when a
    /// ciphertext fails to decrypt or parse. The record is unchanged on error.
    pub fn decrypt(&self, record: &mut Record) -> Result<(), CryptError> {
        if !record.is_sealed() {
            return Ok(());
        }
        let record_id = record.id();
        let id = record_id.as_deref();

        let mut restored: Vec<(String, Value)> = Vec::new();

        if let Some(side_map) = record.separated_ciphers() {
            for (field, ciphertext) in side_map {
                let value = self
                    .separated
                    .decrypt(ciphertext)
                    .map_err(|e| CryptError::decode(id, field.as_str(), e))?;
                restored.push((field.clone(), value));
            }
        }

        for field in record.inline_sealed() {
            let decoded = match record.get(field) {
                Some(Value::String(text)) => from_inline(text),
                _ => None,
            };
            let value = decoded
                .unwrap_or_else(|| {
                    Err(CipherError::InvalidFormat("inline ciphertext missing".into()))
                })
                .and_then(|ciphertext| self.separated.decrypt(&ciphertext))
                .map_err(|e| CryptError::decode(id, field.as_str(), e))?;
            restored.push((field.clone(), value));
        }

        let aggregated = match record.aggregated_cipher() {
            Some(blob) if !blob.is_empty() => Some(
                self.aggregated
                    .open(blob)
                    .map_err(|e| CryptError::decode(id, AGGREGATED_CIPHER_FIELD, e))?,
            ),
            _ => None,
        };

        record.clear_ciphers();
        let separated_count = restored.len();
        for (field, value) in restored {
            record.set(field, value);
        }
        let aggregated_count = aggregated.as_ref().map_or(0, Map::len);
        for (field, value) in aggregated.into_iter().flatten() {
            record.set(field, value);
        }

        debug!(
            record_id = ?record_id,
            separated = separated_count,
            aggregated = aggregated_count,
            "record decrypted"
        );
        Ok(())
    }

    /// Decrypt every nested record reachable from `record` through its
    /// declared embedded fields, depth first. Nested records whose schema
    /// has no controller are walked but not decrypted.
    ///
    /// The host does not notify nested records after a persist, so this is
    /// how they get their plaintext back.
    pub(crate) fn restore_nested(record: &mut Record) -> Result<(), CryptError> {
        let paths = embedded_paths(record);
        for path in paths {
            let Some(children) = record.embedded_mut(&path) else {
                continue;
            };
            for child in children.iter_mut() {
                if let Some(crypto) = child.crypto() {
                    crypto.decrypt(child)?;
                }
                Self::restore_nested(child)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DocumentCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCrypto")
            .field("classification", &self.classification)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

fn unloaded_holder(field: &str, holder: &str) -> CryptError {
    CryptError::Encrypt {
        field: field.to_owned(),
        cause: format!("`{holder}` was not loaded; it cannot be rewritten from a projection"),
    }
}

/// Embedded field names of the record's schema, minus identity fields.
pub(crate) fn embedded_paths(record: &Record) -> Vec<String> {
    record
        .schema()
        .embedded_fields()
        .map(|(path, _)| path)
        .filter(|path| *path != ID_FIELD && *path != VERSION_FIELD)
        .map(str::to_owned)
        .collect()
}
