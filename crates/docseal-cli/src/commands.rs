//! Subcommand implementations.
//!
//! Input is a single JSON object or an array of objects; output mirrors the
//! input shape.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use common::{CryptError, SeparatedStorage};
use docseal::{lifecycle, Config, KeyMaterial, RecordKind, Schema, SchemaRegistry, SecretKey};
use serde_json::{Map, Value};
use tracing::info;

/// Load the OpenAPI document at `path` and look up `component`.
pub fn load_schema(
    path: &Path,
    component: &str,
    keys: &KeyMaterial,
    storage: SeparatedStorage,
) -> Result<Arc<Schema>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let registry = SchemaRegistry::from_openapi_text(&text, keys, storage)?;
    info!(
        count = registry.len(),
        schemas = ?registry.names(),
        path = %path.display(),
        "schemas loaded"
    );
    Ok(registry.get(component)?)
}

/// Encrypt every document read from `input` (stdin when `None`).
pub async fn seal(schema: &Arc<Schema>, input: Option<&Path>) -> Result<Value> {
    let (documents, many) = read_documents(input)?;
    let mut out = Vec::with_capacity(documents.len());
    for doc in documents {
        let mut record = docseal::Record::from_document(schema.clone(), doc, RecordKind::TopLevel)?;
        lifecycle::on_pre_persist(&mut record).await?;
        out.push(Value::Object(record.to_document()));
    }
    Ok(shape(out, many))
}

/// Decrypt every stored document read from `input` (stdin when `None`).
pub fn open(schema: &Arc<Schema>, input: Option<&Path>) -> Result<Value> {
    let (documents, many) = read_documents(input)?;
    let out = documents
        .into_iter()
        .map(|doc| {
            lifecycle::on_hydrate(schema, doc, RecordKind::TopLevel)
                .map(|record| Value::Object(record.to_document()))
        })
        .collect::<Result<Vec<_>, CryptError>>()?;
    Ok(shape(out, many))
}

/// Fresh keys as shell assignments.
pub fn keygen() -> Result<String> {
    let separated = SecretKey::generate(docseal::crypto::KEY_LEN)?;
    let aggregated = SecretKey::generate(docseal::crypto::KEY_LEN)?;
    Ok(format!(
        "DOCSEAL_SEPARATED_KEY={}\nDOCSEAL_AGGREGATED_KEY={}\n",
        separated.to_base64(),
        aggregated.to_base64()
    ))
}

/// Load configuration and decode both keys.
pub fn load_config() -> Result<(Config, KeyMaterial)> {
    let cfg = Config::from_env().context("configuration invalid")?;
    let keys = cfg.key_material().context("key material invalid")?;
    Ok((cfg, keys))
}

fn read_documents(input: Option<&Path>) -> Result<(Vec<Map<String, Value>>, bool)> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };
    let value: Value = serde_json::from_str(&text).context("input is not valid JSON")?;
    parse_documents(value)
}

fn parse_documents(value: Value) -> Result<(Vec<Map<String, Value>>, bool)> {
    match value {
        Value::Object(doc) => Ok((vec![doc], false)),
        Value::Array(items) => {
            let docs = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(doc) => Ok(doc),
                    _ => bail!("input item {i} is not a JSON object"),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((docs, true))
        }
        _ => bail!("input must be a JSON object or an array of objects"),
    }
}

fn shape(mut documents: Vec<Value>, many: bool) -> Value {
    if many {
        Value::Array(documents)
    } else {
        documents.pop().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const API: &str = r#"{
        "openapi": "3.0.0",
        "info": {"title": "t", "version": "1"},
        "paths": {},
        "components": {"schemas": {"Person": {
            "type": "object",
            "properties": {
                "ssn": {"type": "string", "x-encrypt": "separated"},
                "profile": {"type": "object", "x-encrypt": "aggregated"}
            }
        }}}
    }"#;

    fn schema() -> Arc<Schema> {
        let keys = KeyMaterial {
            separated: SecretKey::from_bytes(b"cli-separated".to_vec()),
            aggregated: SecretKey::from_bytes(vec![9; 32]),
        };
        SchemaRegistry::from_openapi_text(API, &keys, SeparatedStorage::SideMap)
            .unwrap()
            .get("Person")
            .unwrap()
    }

    fn write_temp(name: &str, value: &Value) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("docseal-{}-{name}", std::process::id()));
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn seal_then_open_round_trips() {
        let schema = schema();
        let plain = json!({"_id": "p1", "ssn": "123-45-6789", "profile": {"income": 1}});
        let input = write_temp("plain.json", &plain);

        let sealed = seal(&schema, Some(&input)).await.unwrap();
        assert!(sealed.get("ssn").is_none());
        assert!(sealed.get("_ct").is_some());

        let stored = write_temp("sealed.json", &sealed);
        let opened = open(&schema, Some(&stored)).unwrap();
        assert_eq!(opened, plain);

        let _ = std::fs::remove_file(input);
        let _ = std::fs::remove_file(stored);
    }

    #[test]
    fn arrays_keep_their_shape() {
        let (docs, many) = parse_documents(json!([{"a": 1}, {"b": 2}])).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(many);
        assert_eq!(shape(vec![json!(1), json!(2)], many), json!([1, 2]));
    }

    #[test]
    fn rejects_non_object_input() {
        assert!(parse_documents(json!("text")).is_err());
        assert!(parse_documents(json!([1])).is_err());
    }

    #[test]
    fn keygen_prints_both_assignments() {
        let out = keygen().unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("DOCSEAL_SEPARATED_KEY="));
        assert!(lines[1].starts_with("DOCSEAL_AGGREGATED_KEY="));
        let aggregated = lines[1].trim_start_matches("DOCSEAL_AGGREGATED_KEY=");
        let separated = lines[0].trim_start_matches("DOCSEAL_SEPARATED_KEY=");
        assert!(KeyMaterial::from_base64(separated, aggregated).is_ok());
    }
}
