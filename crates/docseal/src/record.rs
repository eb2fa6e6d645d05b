//! In-memory record: plain field values, nested records, and the reserved
//! ciphertext holders.
//!
//! A [`Record`] is what callers read and write. Its storage form
//! ([`Record::to_document`]) is a JSON object in which the aggregated blob
//! (`_ct`) and the separated side map (`_co`) are base64 strings.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{
    protocol::{AGGREGATED_CIPHER_FIELD, ID_FIELD, INLINE_PREFIX, SEPARATED_CIPHER_FIELD},
    CryptError,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::controller::DocumentCrypto;
use crate::schema::{FieldType, Schema};

/// Whether a record is persisted on its own or embedded in a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Persisted directly; receives every lifecycle notification.
    TopLevel,
    /// Embedded in a parent's field tree; not notified after persist.
    Nested,
}

/// A structured record of a [`Schema`].
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    kind: RecordKind,
    fields: Map<String, Value>,
    embedded: BTreeMap<String, Vec<Record>>,
    aggregated_cipher: Option<Vec<u8>>,
    separated_ciphers: Option<BTreeMap<String, Vec<u8>>>,
    inline_sealed: BTreeSet<String>,
    is_new: bool,
    selection: Option<HashSet<String>>,
}

impl Record {
    /// A new top-level record with a fresh `_id`.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::fresh(schema, RecordKind::TopLevel)
    }

    /// A new nested record with a fresh `_id`.
    pub fn new_nested(schema: Arc<Schema>) -> Self {
        Self::fresh(schema, RecordKind::Nested)
    }

    fn fresh(schema: Arc<Schema>, kind: RecordKind) -> Self {
        let mut record = Self::empty(schema, kind);
        record
            .fields
            .insert(ID_FIELD.to_owned(), Value::String(Uuid::new_v4().to_string()));
        record.is_new = true;
        record
    }

    fn empty(schema: Arc<Schema>, kind: RecordKind) -> Self {
        Self {
            schema,
            kind,
            fields: Map::new(),
            embedded: BTreeMap::new(),
            aggregated_cipher: None,
            separated_ciphers: None,
            inline_sealed: BTreeSet::new(),
            is_new: false,
            selection: None,
        }
    }

    /// Parse a stored document. Embedded fields declared by the schema become
    /// nested records. Nothing is decrypted here.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Decode`] if a reserved cipher field is not valid
    /// base64 or an embedded field is not an array of objects.
    pub fn from_document(
        schema: Arc<Schema>,
        document: Map<String, Value>,
        kind: RecordKind,
    ) -> Result<Self, CryptError> {
        let record_id = document.get(ID_FIELD).and_then(render_id);
        let id = record_id.as_deref();
        let mut record = Self::empty(schema.clone(), kind);

        for (key, value) in document {
            match key.as_str() {
                AGGREGATED_CIPHER_FIELD => {
                    record.aggregated_cipher = match value {
                        Value::Null => None,
                        Value::String(text) if text.is_empty() => None,
                        Value::String(text) => Some(
                            STANDARD
                                .decode(text)
                                .map_err(|e| CryptError::decode(id, AGGREGATED_CIPHER_FIELD, e))?,
                        ),
                        other => {
                            return Err(CryptError::decode(
                                id,
                                AGGREGATED_CIPHER_FIELD,
                                format!("expected a base64 string, found {other}"),
                            ))
                        }
                    };
                }
                SEPARATED_CIPHER_FIELD => {
                    record.separated_ciphers = match value {
                        Value::Null => None,
                        Value::Object(map) => Some(decode_side_map(id, map)?),
                        _ => {
                            return Err(CryptError::decode(
                                id,
                                SEPARATED_CIPHER_FIELD,
                                "expected an object of base64 strings",
                            ))
                        }
                    };
                }
                _ => match schema.field(&key).map(|f| f.ty()) {
                    Some(FieldType::Embedded(nested_schema)) => {
                        let nested = decode_embedded(id, &key, nested_schema, value)?;
                        record.embedded.insert(key, nested);
                    }
                    _ => {
                        record.fields.insert(key, value);
                    }
                },
            }
        }

        // Stored separated values are always ciphertext, so a prefixed value
        // of a separated field is an inline ciphertext.
        if let Some(crypto) = schema.crypto() {
            for field in crypto.classification().separated() {
                let sealed = matches!(
                    record.fields.get(field),
                    Some(Value::String(s)) if s.starts_with(INLINE_PREFIX)
                );
                if sealed {
                    record.inline_sealed.insert(field.clone());
                }
            }
        }

        Ok(record)
    }

    /// As [`Record::from_document`], for a document loaded with a projection
    /// that only included `selected` fields.
    pub fn from_partial_document<I, S>(
        schema: Arc<Schema>,
        document: Map<String, Value>,
        kind: RecordKind,
        selected: I,
    ) -> Result<Self, CryptError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut record = Self::from_document(schema, document, kind)?;
        record.selection = Some(selected.into_iter().map(Into::into).collect());
        Ok(record)
    }

    /// The storage form of this record, including nested records and any
    /// ciphertext holders.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = self.fields.clone();
        for (name, records) in &self.embedded {
            let items = records
                .iter()
                .map(|r| Value::Object(r.to_document()))
                .collect();
            doc.insert(name.clone(), Value::Array(items));
        }
        if let Some(blob) = &self.aggregated_cipher {
            doc.insert(
                AGGREGATED_CIPHER_FIELD.to_owned(),
                Value::String(STANDARD.encode(blob)),
            );
        }
        if let Some(map) = &self.separated_ciphers {
            let encoded = map
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(STANDARD.encode(v))))
                .collect();
            doc.insert(SEPARATED_CIPHER_FIELD.to_owned(), Value::Object(encoded));
        }
        doc
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// The crypto controller of this record's schema. `Some` exactly when the
    /// record exposes encrypt/decrypt behaviour.
    pub fn crypto(&self) -> Option<Arc<DocumentCrypto>> {
        self.schema.crypto().cloned()
    }

    /// The record identifier (`_id`), rendered as text.
    pub fn id(&self) -> Option<String> {
        self.fields.get(ID_FIELD).and_then(render_id)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a plain field, returning the previous value. The new value is
    /// plaintext, whatever its content.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        let field = field.into();
        self.inline_sealed.remove(&field);
        self.fields.insert(field, value)
    }

    /// Remove a plain field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.inline_sealed.remove(field);
        self.fields.remove(field)
    }

    /// The plain fields, excluding nested records and ciphertext holders.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Nested records stored under `field`.
    pub fn embedded(&self, field: &str) -> &[Record] {
        self.embedded.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn embedded_mut(&mut self, field: &str) -> Option<&mut Vec<Record>> {
        self.embedded.get_mut(field)
    }

    /// Append a nested record under `field`.
    pub fn push_embedded(&mut self, field: impl Into<String>, record: Record) {
        self.embedded.entry(field.into()).or_default().push(record);
    }

    /// The aggregated blob, when present.
    pub fn aggregated_cipher(&self) -> Option<&[u8]> {
        self.aggregated_cipher.as_deref()
    }

    /// The separated side map, when present.
    pub fn separated_ciphers(&self) -> Option<&BTreeMap<String, Vec<u8>>> {
        self.separated_ciphers.as_ref()
    }

    pub(crate) fn set_aggregated_cipher(&mut self, blob: Vec<u8>) {
        self.aggregated_cipher = Some(blob);
    }

    /// Fields whose value is an inline separated ciphertext.
    pub fn inline_sealed(&self) -> &BTreeSet<String> {
        &self.inline_sealed
    }

    pub(crate) fn clear_ciphers(&mut self) {
        self.aggregated_cipher = None;
        self.separated_ciphers = None;
        self.inline_sealed.clear();
    }

    pub(crate) fn set_inline_cipher(&mut self, field: String, text: String) {
        self.fields.insert(field.clone(), Value::String(text));
        self.inline_sealed.insert(field);
    }

    pub(crate) fn insert_separated_cipher(&mut self, field: String, ciphertext: Vec<u8>) {
        self.separated_ciphers
            .get_or_insert_with(BTreeMap::new)
            .insert(field, ciphertext);
    }

    /// Returns `true` while the record holds any ciphertext: an aggregated blob,
    /// a side map, or an inline separated value written by encryption or
    /// loaded from storage.
    pub fn is_sealed(&self) -> bool {
        self.aggregated_cipher.is_some()
            || self.separated_ciphers.is_some()
            || !self.inline_sealed.is_empty()
    }

    /// Returns `true` until the record (or its parent) has been persisted.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Record a successful persist for this record and all nested records.
    pub fn mark_persisted(&mut self) {
        self.is_new = false;
        for records in self.embedded.values_mut() {
            records.iter_mut().for_each(Record::mark_persisted);
        }
    }

    /// Whether `field` was included by the projection the record was loaded
    /// with. Always `true` for records loaded whole or created in memory.
    pub fn is_selected(&self, field: &str) -> bool {
        self.selection
            .as_ref()
            .map_or(true, |selected| selected.contains(field))
    }
}

fn render_id(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn decode_side_map(
    id: Option<&str>,
    map: Map<String, Value>,
) -> Result<BTreeMap<String, Vec<u8>>, CryptError> {
    map.into_iter()
        .map(|(field, value)| {
            let bytes = match &value {
                Value::String(text) => STANDARD
                    .decode(text)
                    .map_err(|e| CryptError::decode(id, field.as_str(), e))?,
                _ => {
                    return Err(CryptError::decode(
                        id,
                        field.as_str(),
                        "separated ciphertext is not a base64 string",
                    ))
                }
            };
            Ok((field, bytes))
        })
        .collect()
}

fn decode_embedded(
    id: Option<&str>,
    field: &str,
    schema: &Arc<Schema>,
    value: Value,
) -> Result<Vec<Record>, CryptError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(doc) => Record::from_document(schema.clone(), doc, RecordKind::Nested),
                _ => Err(CryptError::decode(id, field, "embedded item is not an object")),
            })
            .collect(),
        _ => Err(CryptError::decode(
            id,
            field,
            "expected an array of embedded records",
        )),
    }
}
