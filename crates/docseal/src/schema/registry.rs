//! Immutable lookup of schemas by record type name.

use std::{collections::HashMap, sync::Arc};

use common::{CryptError, SeparatedStorage};

use super::{parse_openapi, resolver::resolve_schemas, Schema};
use crate::keys::KeyMaterial;

/// Schemas keyed by name, built once at setup.
///
/// Cheap to clone; every clone shares the same map.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    inner: Arc<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Wrap an already-built map.
    pub fn new(schemas: HashMap<String, Arc<Schema>>) -> Self {
        Self {
            inner: Arc::new(schemas),
        }
    }

    /// Parse an OpenAPI document (YAML or JSON) and build every component.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if the document does not parse or any
    /// component is declared illegally.
    pub fn from_openapi_text(
        text: &str,
        keys: &KeyMaterial,
        storage: SeparatedStorage,
    ) -> Result<Self, CryptError> {
        let api = parse_openapi(text)?;
        Ok(Self::new(resolve_schemas(&api, keys, storage)?))
    }

    /// Return the number of schemas.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Return `true` if no schemas are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Look up a schema by name.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<Arc<Schema>, CryptError> {
        self.inner
            .get(name)
            .cloned()
            .ok_or_else(|| CryptError::Config(format!("unknown schema: {name}")))
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
