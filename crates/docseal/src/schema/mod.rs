//! Field metadata, classification, and schema loading.
//!
//! # Responsibilities
//!
//! - Describe the fields of a record type ([`Schema`], [`FieldDef`]).
//! - Partition declared fields into plaintext, separated and aggregated
//!   classes ([`classifier`]).
//! - Attach a [`DocumentCrypto`] controller to a schema
//!   ([`Schema::with_encryption`]).
//! - Build schemas from OpenAPI documents annotated with `x-encrypt`
//!   ([`resolver`]) and serve them by name ([`SchemaRegistry`]).
//!
//! Field metadata is derived once at setup and is immutable afterwards.

pub mod classifier;
pub mod registry;
pub mod resolver;

pub use classifier::{classify, FieldClassification};
pub use registry::SchemaRegistry;

use std::{collections::HashSet, sync::Arc};

use common::{
    protocol::{is_reserved_field, ID_FIELD, VERSION_FIELD},
    CryptError, EncryptionMode, SeparatedStorage,
};
use openapiv3::OpenAPI;
use tracing::info;

use crate::controller::DocumentCrypto;
use crate::crypto::{EntropySource, OsEntropy};
use crate::keys::KeyMaterial;

/// Storage shape of a declared field.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// Any JSON value: string, number, boolean, plain object.
    Value,
    /// An array of values, optionally with an element-level mode annotation.
    Array {
        /// Mode declared on the element type. Takes precedence over the
        /// container-level mode.
        element: Option<EncryptionMode>,
    },
    /// An array of nested records with their own schema.
    Embedded(Arc<Schema>),
}

/// A single declared field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    ty: FieldType,
    encrypt: Option<EncryptionMode>,
    indexed: bool,
}

impl FieldDef {
    /// A plain value field.
    pub fn value(name: impl Into<String>) -> Self {
        Self::with_type(name, FieldType::Value)
    }

    /// An array field without an element annotation.
    pub fn array(name: impl Into<String>) -> Self {
        Self::with_type(name, FieldType::Array { element: None })
    }

    /// An array of nested records.
    pub fn embedded(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::with_type(name, FieldType::Embedded(schema))
    }

    fn with_type(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            encrypt: None,
            indexed: false,
        }
    }

    /// Declare the container-level encryption mode.
    pub fn encrypt(mut self, mode: EncryptionMode) -> Self {
        self.encrypt = Some(mode);
        self
    }

    /// Declare the element-level encryption mode, turning the field into an
    /// array field if it is not one already.
    pub fn element_encrypt(mut self, mode: EncryptionMode) -> Self {
        self.ty = FieldType::Array {
            element: Some(mode),
        };
        self
    }

    /// Mark the field as indexed. Indexed fields cannot be encrypted.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// The mode that applies to this field: the element-level annotation if
    /// present, else the container-level one.
    pub fn effective_mode(&self) -> Option<EncryptionMode> {
        match self.ty {
            FieldType::Array {
                element: Some(mode),
            } => Some(mode),
            _ => self.encrypt,
        }
    }
}

/// The declared fields of a record type, plus its crypto controller once
/// [`Schema::with_encryption`] has been applied.
#[derive(Debug)]
pub struct Schema {
    name: String,
    fields: Vec<FieldDef>,
    crypto: Option<Arc<DocumentCrypto>>,
}

impl Schema {
    /// Start a schema. The identity fields `_id` (indexed) and `__v` are
    /// declared implicitly.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a declared field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared embedded-record fields with their nested schemas.
    pub fn embedded_fields(&self) -> impl Iterator<Item = (&str, &Arc<Schema>)> {
        self.fields.iter().filter_map(|f| match &f.ty {
            FieldType::Embedded(schema) => Some((f.name.as_str(), schema)),
            _ => None,
        })
    }

    /// Returns `true` if any field declares an encryption mode.
    pub fn declares_encryption(&self) -> bool {
        self.fields.iter().any(|f| f.effective_mode().is_some())
    }

    /// The crypto controller, if encryption was applied to this schema.
    /// Records of this type expose decrypt behaviour exactly when this is `Some`.
    pub fn crypto(&self) -> Option<&Arc<DocumentCrypto>> {
        self.crypto.as_ref()
    }

    /// Share the schema without encryption.
    pub fn into_shared(self) -> Arc<Schema> {
        Arc::new(self)
    }

    /// Classify the fields and attach a [`DocumentCrypto`] controller that
    /// draws IVs from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] on an illegal field declaration.
    pub fn with_encryption(
        self,
        keys: &KeyMaterial,
        storage: SeparatedStorage,
    ) -> Result<Arc<Schema>, CryptError> {
        self.with_encryption_source(keys, storage, Arc::new(OsEntropy))
    }

    /// As [`Schema::with_encryption`], with an explicit entropy source.
    pub fn with_encryption_source(
        mut self,
        keys: &KeyMaterial,
        storage: SeparatedStorage,
        entropy: Arc<dyn EntropySource>,
    ) -> Result<Arc<Schema>, CryptError> {
        let classification = classify(&self.fields)?;
        info!(
            schema = %self.name,
            separated = classification.separated().len(),
            aggregated = classification.aggregated().len(),
            ?storage,
            "encryption applied to schema"
        );
        let crypto = DocumentCrypto::new(classification, keys, storage, entropy)?;
        self.crypto = Some(Arc::new(crypto));
        Ok(Arc::new(self))
    }
}

/// Incremental [`Schema`] construction.
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldDef>,
}

impl SchemaBuilder {
    /// Declare a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Finish the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if a field name is declared twice or a
    /// field uses a reserved name. The identity fields `_id` and `__v` are
    /// always declared by the builder itself.
    pub fn build(self) -> Result<Schema, CryptError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if is_reserved_field(&field.name) {
                return Err(CryptError::Config(format!(
                    "schema `{}`: field name `{}` is reserved",
                    self.name, field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CryptError::Config(format!(
                    "schema `{}`: field `{}` declared more than once",
                    self.name, field.name
                )));
            }
        }
        let mut fields = vec![FieldDef::value(ID_FIELD).indexed(), FieldDef::value(VERSION_FIELD)];
        fields.extend(self.fields);
        Ok(Schema {
            name: self.name,
            fields,
            crypto: None,
        })
    }
}

/// Parse an OpenAPI document from YAML, falling back to JSON.
///
/// # Errors
///
/// Returns [`CryptError::Config`] if the text is neither.
pub fn parse_openapi(text: &str) -> Result<OpenAPI, CryptError> {
    if let Ok(parsed) = serde_yaml::from_str(text) {
        Ok(parsed)
    } else if let Ok(parsed) = serde_json::from_str(text) {
        Ok(parsed)
    } else {
        Err(CryptError::Config(
            "failed to parse OpenAPI schema: not valid YAML or JSON".into(),
        ))
    }
}
