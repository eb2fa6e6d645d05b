//! Build [`Schema`]s from an OpenAPI document.
//!
//! Every object schema in `components/schemas` becomes a record type. Field
//! metadata is read from vendor extensions on each property:
//!
//! - `x-encrypt: separated | aggregated` on a property or on an array's
//!   `items` (the `items` annotation takes precedence),
//! - `x-index: true` marks the property as indexed,
//! - an array whose `items` is a `$ref` to another component becomes an
//!   embedded-record field of that component's type.
//!
//! Components that declare at least one encrypted field get a crypto
//! controller attached; the others are plain schemas.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::{
    protocol::{ID_FIELD, VERSION_FIELD},
    CryptError, EncryptionMode, SeparatedStorage,
};
use openapiv3::{OpenAPI, ReferenceOr, SchemaKind, Type};
use serde_json::Value;

use super::{FieldDef, Schema};
use crate::keys::KeyMaterial;

const ENCRYPT_EXT: &str = "x-encrypt";
const INDEX_EXT: &str = "x-index";
const COMPONENT_REF_PREFIX: &str = "#/components/schemas/";

/// Build a schema for every component in `api`.
///
/// # Errors
///
/// Returns [`CryptError::Config`] on unresolvable or cyclic references, on an
/// unknown `x-encrypt` tag, or on any illegal field declaration.
pub fn resolve_schemas(
    api: &OpenAPI,
    keys: &KeyMaterial,
    storage: SeparatedStorage,
) -> Result<HashMap<String, Arc<Schema>>, CryptError> {
    let mut resolver = Resolver {
        api,
        keys,
        storage,
        built: HashMap::new(),
        in_progress: HashSet::new(),
    };

    let names: Vec<String> = match &api.components {
        Some(c) => c.schemas.keys().cloned().collect(),
        None => return Ok(HashMap::new()),
    };
    for name in &names {
        resolver.component(name)?;
    }
    Ok(resolver.built)
}

struct Resolver<'a> {
    api: &'a OpenAPI,
    keys: &'a KeyMaterial,
    storage: SeparatedStorage,
    built: HashMap<String, Arc<Schema>>,
    in_progress: HashSet<String>,
}

impl Resolver<'_> {
    fn component(&mut self, name: &str) -> Result<Arc<Schema>, CryptError> {
        if let Some(done) = self.built.get(name) {
            return Ok(done.clone());
        }
        if !self.in_progress.insert(name.to_owned()) {
            return Err(CryptError::Config(format!(
                "component `{name}` embeds itself through a reference cycle"
            )));
        }

        let api = self.api;
        let component = api
            .components
            .as_ref()
            .and_then(|c| c.schemas.get(name))
            .ok_or_else(|| CryptError::Config(format!("unknown component `{name}`")))?;

        let schema = match component {
            ReferenceOr::Reference { reference } => {
                let target = ref_name(reference)?;
                self.component(target)?
            }
            ReferenceOr::Item(item) => {
                let obj = match &item.schema_kind {
                    SchemaKind::Type(Type::Object(obj)) => obj,
                    _ => {
                        return Err(CryptError::Config(format!(
                            "component `{name}` is not an object schema"
                        )))
                    }
                };

                let mut builder = Schema::builder(name);
                for (prop_name, prop_ref) in &obj.properties {
                    // Identity fields are declared implicitly by the builder.
                    if prop_name == ID_FIELD || prop_name == VERSION_FIELD {
                        continue;
                    }
                    let field = match prop_ref {
                        ReferenceOr::Reference { .. } => FieldDef::value(prop_name),
                        ReferenceOr::Item(prop) => self.property(prop_name, prop)?,
                    };
                    builder = builder.field(field);
                }

                let schema = builder.build()?;
                if schema.declares_encryption() {
                    schema.with_encryption(self.keys, self.storage)?
                } else {
                    schema.into_shared()
                }
            }
        };

        self.in_progress.remove(name);
        self.built.insert(name.to_owned(), schema.clone());
        Ok(schema)
    }

    fn property(&mut self, name: &str, prop: &openapiv3::Schema) -> Result<FieldDef, CryptError> {
        let extensions = &prop.schema_data.extensions;

        let mut field = match &prop.schema_kind {
            SchemaKind::Type(Type::Array(arr)) => match &arr.items {
                Some(ReferenceOr::Reference { reference }) => {
                    let nested = self.component(ref_name(reference)?)?;
                    FieldDef::embedded(name, nested)
                }
                Some(ReferenceOr::Item(items)) => {
                    let field = FieldDef::array(name);
                    match encrypt_mode(name, items.schema_data.extensions.get(ENCRYPT_EXT))? {
                        Some(mode) => field.element_encrypt(mode),
                        None => field,
                    }
                }
                None => FieldDef::array(name),
            },
            _ => FieldDef::value(name),
        };

        if let Some(mode) = encrypt_mode(name, extensions.get(ENCRYPT_EXT))? {
            field = field.encrypt(mode);
        }
        if extensions.get(INDEX_EXT).and_then(Value::as_bool).unwrap_or(false) {
            field = field.indexed();
        }
        Ok(field)
    }
}

/// Interpret the value of an `x-encrypt` extension.
fn encrypt_mode(field: &str, tag: Option<&Value>) -> Result<Option<EncryptionMode>, CryptError> {
    match tag {
        None => Ok(None),
        Some(Value::String(tag)) => EncryptionMode::from_tag(tag).map(Some).ok_or_else(|| {
            CryptError::Config(format!(
                "field `{field}`: unknown {ENCRYPT_EXT} value `{tag}`"
            ))
        }),
        Some(other) => Err(CryptError::Config(format!(
            "field `{field}`: {ENCRYPT_EXT} must be a string, got {other}"
        ))),
    }
}

fn ref_name(reference: &str) -> Result<&str, CryptError> {
    reference
        .strip_prefix(COMPONENT_REF_PREFIX)
        .ok_or_else(|| CryptError::Config(format!("unsupported reference `{reference}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::keys::SecretKey;

    fn keys() -> KeyMaterial {
        KeyMaterial {
            separated: SecretKey::from_bytes(b"separated".to_vec()),
            aggregated: SecretKey::from_bytes(vec![0x42; KEY_LEN]),
        }
    }

    fn resolve(yaml: &str) -> Result<HashMap<String, Arc<Schema>>, CryptError> {
        let api: OpenAPI = serde_yaml::from_str(yaml).expect("valid YAML");
        resolve_schemas(&api, &keys(), SeparatedStorage::SideMap)
    }

    const PEOPLE: &str = r##"
openapi: "3.0.0"
info:
  title: test
  version: "1"
paths: {}
components:
  schemas:
    Person:
      type: object
      properties:
        _id:
          type: string
        name:
          type: string
        email:
          type: string
          x-index: true
        ssn:
          type: string
          x-encrypt: separated
        profile:
          type: object
          x-encrypt: aggregated
        scores:
          type: array
          x-encrypt: separated
          items:
            type: integer
            x-encrypt: aggregated
        dependents:
          type: array
          items:
            $ref: "#/components/schemas/Dependent"
    Dependent:
      type: object
      properties:
        name:
          type: string
        birth_date:
          type: string
          x-encrypt: separated
    Plain:
      type: object
      properties:
        title:
          type: string
"##;

    #[test]
    fn builds_classified_schemas() {
        let schemas = resolve(PEOPLE).unwrap();
        assert_eq!(schemas.len(), 3);

        let person = &schemas["Person"];
        let crypto = person.crypto().expect("Person declares encrypted fields");
        let c = crypto.classification();
        assert_eq!(c.separated(), ["ssn"]);
        assert_eq!(c.aggregated(), ["profile", "scores"]);
        assert!(person.field("email").unwrap().is_indexed());
    }

    #[test]
    fn embedded_component_is_shared_and_encrypted() {
        let schemas = resolve(PEOPLE).unwrap();
        let (name, nested) = schemas["Person"].embedded_fields().next().unwrap();
        assert_eq!(name, "dependents");
        assert!(Arc::ptr_eq(nested, &schemas["Dependent"]));
        assert!(nested.crypto().is_some());
    }

    #[test]
    fn plain_component_has_no_crypto() {
        let schemas = resolve(PEOPLE).unwrap();
        assert!(schemas["Plain"].crypto().is_none());
    }

    #[test]
    fn indexed_encrypted_property_fails() {
        let yaml = r#"
openapi: "3.0.0"
info:
  title: test
  version: "1"
paths: {}
components:
  schemas:
    Person:
      type: object
      properties:
        email:
          type: string
          x-index: true
          x-encrypt: separated
"#;
        assert!(matches!(resolve(yaml), Err(CryptError::Config(_))));
    }

    #[test]
    fn unknown_mode_fails() {
        let yaml = r#"
openapi: "3.0.0"
info:
  title: test
  version: "1"
paths: {}
components:
  schemas:
    Person:
      type: object
      properties:
        ssn:
          type: string
          x-encrypt: rc4
"#;
        let err = resolve(yaml).unwrap_err();
        assert!(err.to_string().contains("rc4"), "{err}");
    }

    #[test]
    fn reference_cycle_fails() {
        let yaml = r##"
openapi: "3.0.0"
info:
  title: test
  version: "1"
paths: {}
components:
  schemas:
    Node:
      type: object
      properties:
        children:
          type: array
          items:
            $ref: "#/components/schemas/Node"
"##;
        let err = resolve(yaml).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn no_components_returns_empty() {
        let yaml = r#"
openapi: "3.0.0"
info:
  title: test
  version: "1"
paths: {}
"#;
        assert!(resolve(yaml).unwrap().is_empty());
    }
}
