//! Lifecycle adapter: the host calls these at its extension points.
//!
//! | Host event     | Function                | Effect                                   |
//! |----------------|-------------------------|------------------------------------------|
//! | hydrate        | [`on_hydrate`]          | parse, decrypt nested then the record    |
//! | pre-persist    | [`on_pre_persist`]      | encrypt nested then the record           |
//! | post-persist   | [`on_post_persist`]     | decrypt the record, then nested records  |
//! | post-validate  | [`on_post_validate`]    | on failure, decrypt nested records       |
//!
//! Every function works on records whose schema has no crypto controller;
//! such records are only walked for nested records that do.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::{
    protocol::{AGGREGATED_CIPHER_FIELD, SEPARATED_CIPHER_FIELD},
    CryptError, SeparatedStorage,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::controller::{embedded_paths, DocumentCrypto};
use crate::record::{Record, RecordKind};
use crate::schema::Schema;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Build a record from stored data and restore its plaintext.
///
/// Synchronous for both kinds: nested records must be usable immediately,
/// and decryption never suspends.
///
/// # Errors
///
/// Returns [`CryptError::Decode`] if any ciphertext in the record or its
/// nested records is corrupt. The hydration step must be aborted.
pub fn on_hydrate(
    schema: &Arc<Schema>,
    raw: Map<String, Value>,
    kind: RecordKind,
) -> Result<Record, CryptError> {
    let mut record = Record::from_document(schema.clone(), raw, kind)?;
    restore(&mut record)?;
    Ok(record)
}

/// As [`on_hydrate`], for data loaded with a projection over `selected`.
pub fn on_hydrate_partial<I, S>(
    schema: &Arc<Schema>,
    raw: Map<String, Value>,
    kind: RecordKind,
    selected: I,
) -> Result<Record, CryptError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut record = Record::from_partial_document(schema.clone(), raw, kind, selected)?;
    restore(&mut record)?;
    Ok(record)
}

fn restore(record: &mut Record) -> Result<(), CryptError> {
    DocumentCrypto::restore_nested(record)?;
    if let Some(crypto) = record.crypto() {
        crypto.decrypt(record)?;
    }
    Ok(())
}

/// Encrypt a record before it is written.
///
/// Nested records are encrypted first, as the host runs their pre-persist
/// step before the parent's. A record loaded through a projection is encrypted
/// when it loaded a ciphertext holder or carries an encrypted field; only the
/// holders it loaded are rewritten.
///
/// # Errors
///
/// Returns the encryption error; the host must abort the persist. Nested
/// records already encrypted are decrypted again before returning. Changing
/// an encrypted field whose holder was not loaded is an error.
pub async fn on_pre_persist(record: &mut Record) -> Result<(), CryptError> {
    let result = seal(record).await;
    if let Err(e) = &result {
        warn!(record_id = ?record.id(), error = %e, "encryption failed; persist aborted");
        if let Err(restore_err) = DocumentCrypto::restore_nested(record) {
            warn!(error = %restore_err, "failed to restore nested records after aborted persist");
        }
    }
    result
}

fn seal(record: &mut Record) -> BoxFuture<'_, Result<(), CryptError>> {
    Box::pin(async move {
        for path in embedded_paths(record) {
            let Some(children) = record.embedded_mut(&path) else {
                continue;
            };
            for child in children.iter_mut() {
                seal(child).await?;
            }
        }

        let Some(crypto) = record.crypto() else {
            return Ok(());
        };
        if should_encrypt(&crypto, record) {
            crypto.encrypt(record).await
        } else {
            debug!(
                record_id = ?record.id(),
                "no ciphertext holder or encrypted field loaded; skipping encryption"
            );
            Ok(())
        }
    })
}

fn should_encrypt(crypto: &DocumentCrypto, record: &Record) -> bool {
    let classification = crypto.classification();
    let side_map_selected = crypto.storage() == SeparatedStorage::SideMap
        && record.is_selected(SEPARATED_CIPHER_FIELD);
    record.is_new()
        || record.is_selected(AGGREGATED_CIPHER_FIELD)
        || side_map_selected
        || classification
            .separated()
            .iter()
            .chain(classification.aggregated())
            .any(|field| record.get(field).is_some())
}

/// Restore plaintext in memory after a successful persist.
///
/// Nested records are restored here because the host does not notify them.
///
/// # Errors
///
/// Returns [`CryptError::Decode`] if any ciphertext fails to decrypt.
pub fn on_post_persist(record: &mut Record) -> Result<(), CryptError> {
    record.mark_persisted();
    if let Some(crypto) = record.crypto() {
        crypto.decrypt(record)?;
    }
    DocumentCrypto::restore_nested(record)
}

/// After validation: if it failed, restore nested records so a corrected
/// retry does not persist already-encrypted children as plaintext input.
///
/// # Errors
///
/// Returns [`CryptError::Decode`] if any nested ciphertext fails to decrypt.
pub fn on_post_validate(record: &mut Record, has_errors: bool) -> Result<(), CryptError> {
    if !has_errors {
        return Ok(());
    }
    debug!(record_id = ?record.id(), "validation failed; restoring nested records");
    DocumentCrypto::restore_nested(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::keys::{KeyMaterial, SecretKey};
    use crate::schema::FieldDef;
    use common::EncryptionMode;
    use serde_json::json;

    fn keys() -> KeyMaterial {
        KeyMaterial {
            separated: SecretKey::from_bytes(b"separated-key".to_vec()),
            aggregated: SecretKey::from_bytes(vec![0x42; KEY_LEN]),
        }
    }

    fn schemas() -> (Arc<Schema>, Arc<Schema>) {
        let child = Schema::builder("Dependent")
            .field(FieldDef::value("name"))
            .field(FieldDef::value("birth_date").encrypt(EncryptionMode::Separated))
            .build()
            .unwrap()
            .with_encryption(&keys(), SeparatedStorage::SideMap)
            .unwrap();
        let parent = Schema::builder("Person")
            .field(FieldDef::value("ssn").encrypt(EncryptionMode::Separated))
            .field(FieldDef::value("profile").encrypt(EncryptionMode::Aggregated))
            .field(FieldDef::embedded("dependents", child.clone()))
            .build()
            .unwrap()
            .with_encryption(&keys(), SeparatedStorage::SideMap)
            .unwrap();
        (parent, child)
    }

    fn family() -> Record {
        let (parent, child) = schemas();
        let mut record = Record::new(parent);
        record.set("ssn", json!("123-45-6789"));
        record.set("profile", json!({"income": 50000, "notes": "ok"}));
        let mut kid = Record::new_nested(child);
        kid.set("name", json!("Sam"));
        kid.set("birth_date", json!("2015-04-01"));
        record.push_embedded("dependents", kid);
        record
    }

    #[tokio::test]
    async fn pre_persist_encrypts_nested_and_parent() {
        let mut record = family();
        on_pre_persist(&mut record).await.unwrap();
        assert!(record.get("ssn").is_none());
        let kid = &record.embedded("dependents")[0];
        assert!(kid.get("birth_date").is_none());
        assert!(kid.separated_ciphers().unwrap().contains_key("birth_date"));
    }

    #[tokio::test]
    async fn post_persist_restores_unnotified_nested_records() {
        let mut record = family();
        on_pre_persist(&mut record).await.unwrap();
        on_post_persist(&mut record).unwrap();

        assert!(!record.is_new());
        assert_eq!(record.get("ssn"), Some(&json!("123-45-6789")));
        let kid = &record.embedded("dependents")[0];
        assert_eq!(kid.get("birth_date"), Some(&json!("2015-04-01")));
        assert!(!kid.is_sealed());
    }

    #[tokio::test]
    async fn hydrate_decrypts_stored_document() {
        let mut record = family();
        let original = record.clone();
        on_pre_persist(&mut record).await.unwrap();
        let stored = record.to_document();

        let (parent, _) = schemas();
        let loaded = on_hydrate(&parent, stored, RecordKind::TopLevel).unwrap();
        assert_eq!(loaded.fields(), original.fields());
        assert_eq!(
            loaded.embedded("dependents")[0].fields(),
            original.embedded("dependents")[0].fields()
        );
    }

    fn stored_projection(stored: &Map<String, Value>, selected: &[&str]) -> Record {
        let (parent, _) = schemas();
        let raw = stored
            .iter()
            .filter(|(k, _)| selected.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        on_hydrate_partial(&parent, raw, RecordKind::TopLevel, selected.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn projection_without_ciphertext_skips_encryption() {
        let mut record = family();
        on_pre_persist(&mut record).await.unwrap();
        let stored = record.to_document();

        let mut loaded = stored_projection(&stored, &["_id", "dependents"]);
        assert!(loaded.get("ssn").is_none());

        on_pre_persist(&mut loaded).await.unwrap();
        assert!(!loaded.is_sealed());
        let kid = &loaded.embedded("dependents")[0];
        assert!(kid.separated_ciphers().unwrap().contains_key("birth_date"));
    }

    #[tokio::test]
    async fn projection_with_side_map_reseals_separated_fields() {
        let mut record = family();
        on_pre_persist(&mut record).await.unwrap();
        let stored = record.to_document();

        let mut loaded = stored_projection(&stored, &["_id", "_co"]);
        assert_eq!(loaded.get("ssn"), Some(&json!("123-45-6789")));

        on_pre_persist(&mut loaded).await.unwrap();
        let doc = loaded.to_document();
        assert!(doc.get("ssn").is_none());
        assert!(doc["_co"].get("ssn").is_some());
        assert!(doc.get("_ct").is_none());
    }

    #[tokio::test]
    async fn projection_without_side_map_rejects_separated_change() {
        let mut record = family();
        on_pre_persist(&mut record).await.unwrap();
        let stored = record.to_document();

        let mut loaded = stored_projection(&stored, &["_id"]);
        loaded.set("ssn", json!("987-65-4321"));

        let err = on_pre_persist(&mut loaded).await.unwrap_err();
        assert!(matches!(err, CryptError::Encrypt { ref field, .. } if field == "ssn"));
        assert_eq!(loaded.get("ssn"), Some(&json!("987-65-4321")));
    }

    #[tokio::test]
    async fn failed_validation_restores_nested_records() {
        let mut record = family();
        on_pre_persist(&mut record).await.unwrap();

        on_post_validate(&mut record, false).unwrap();
        assert!(record.embedded("dependents")[0].is_sealed());

        on_post_validate(&mut record, true).unwrap();
        let kid = &record.embedded("dependents")[0];
        assert_eq!(kid.get("birth_date"), Some(&json!("2015-04-01")));
        // The parent itself is left for the host to handle.
        assert!(record.is_sealed());
    }

    #[test]
    fn hydrate_plain_schema_is_passthrough() {
        let plain = Schema::builder("Note")
            .field(FieldDef::value("body"))
            .build()
            .unwrap()
            .into_shared();
        let raw = match json!({"_id": "n1", "body": "hi"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let record = on_hydrate(&plain, raw.clone(), RecordKind::Nested).unwrap();
        assert_eq!(record.to_document(), raw);
        assert_eq!(record.kind(), RecordKind::Nested);
    }
}
