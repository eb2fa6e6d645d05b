//! Partition declared fields into plaintext, separated and aggregated classes.

use std::collections::HashSet;

use common::{
    protocol::{ID_FIELD, VERSION_FIELD},
    CryptError, EncryptionMode,
};

use super::{FieldDef, FieldType};

/// Names of the fields to encrypt, by mode. The two lists are disjoint; every
/// other declared field is plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldClassification {
    separated: Vec<String>,
    aggregated: Vec<String>,
}

impl FieldClassification {
    pub fn separated(&self) -> &[String] {
        &self.separated
    }

    pub fn aggregated(&self) -> &[String] {
        &self.aggregated
    }

    /// Returns `true` if no field is encrypted.
    pub fn is_empty(&self) -> bool {
        self.separated.is_empty() && self.aggregated.is_empty()
    }

    /// The mode assigned to `field`, or `None` for plaintext.
    pub fn mode_of(&self, field: &str) -> Option<EncryptionMode> {
        if self.separated.iter().any(|f| f == field) {
            Some(EncryptionMode::Separated)
        } else if self.aggregated.iter().any(|f| f == field) {
            Some(EncryptionMode::Aggregated)
        } else {
            None
        }
    }

    /// The declared fields that are stored as plaintext.
    pub fn plaintext_fields<'a>(&self, fields: &'a [FieldDef]) -> Vec<&'a str> {
        fields
            .iter()
            .map(FieldDef::name)
            .filter(|name| self.mode_of(name).is_none())
            .collect()
    }
}

/// Classify `fields` by their effective encryption mode.
///
/// # Errors
///
/// Returns [`CryptError::Config`] when a field declares an encryption mode and
/// is indexed, is an identity field, or is an embedded-record field, or when a
/// field name appears twice.
pub fn classify(fields: &[FieldDef]) -> Result<FieldClassification, CryptError> {
    let mut out = FieldClassification::default();
    let mut seen = HashSet::new();

    for field in fields {
        if !seen.insert(field.name()) {
            return Err(CryptError::Config(format!(
                "field `{}` declared more than once",
                field.name()
            )));
        }

        let Some(mode) = field.effective_mode() else {
            continue;
        };

        if field.is_indexed() {
            return Err(CryptError::Config(format!(
                "field `{}` is indexed and cannot be encrypted",
                field.name()
            )));
        }
        if field.name() == ID_FIELD || field.name() == VERSION_FIELD {
            return Err(CryptError::Config(format!(
                "identity field `{}` cannot be encrypted",
                field.name()
            )));
        }
        if matches!(field.ty(), FieldType::Embedded(_)) {
            return Err(CryptError::Config(format!(
                "embedded field `{}` cannot be encrypted; declare modes on the nested schema",
                field.name()
            )));
        }

        match mode {
            EncryptionMode::Separated => out.separated.push(field.name().to_owned()),
            EncryptionMode::Aggregated => out.aggregated.push(field.name().to_owned()),
        }
    }

    Ok(out)
}
