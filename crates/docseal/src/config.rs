//! Configuration loading and validation.
//!
//! Values are read from `DOCSEAL_`-prefixed environment variables:
//!
//! | Variable                      | Required | Default    |
//! |-------------------------------|----------|------------|
//! | `DOCSEAL_SEPARATED_KEY`       | yes      |            |
//! | `DOCSEAL_AGGREGATED_KEY`      | yes      |            |
//! | `DOCSEAL_SEPARATED_STORAGE`   | no       | `side-map` |
//! | `DOCSEAL_LOG_LEVEL`           | no       | `info`     |
//!
//! Keys are standard base64. Every failure is a [`CryptError::Config`].

use common::{CryptError, SeparatedStorage};
use serde::Deserialize;

use crate::keys::KeyMaterial;

const ENV_PREFIX: &str = "DOCSEAL";

/// Validated configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Base64 key for the separated codec. **Required.**
    pub separated_key: String,

    /// Base64 key for the aggregated codec; must decode to 32 bytes. **Required.**
    pub aggregated_key: String,

    /// Where separated ciphertext is kept on a record.
    #[serde(default)]
    pub separated_storage: SeparatedStorage,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if a required variable is absent or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self, CryptError> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(env: config::Environment) -> Result<Self, CryptError> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .map_err(|e| CryptError::Config(format!("failed to read environment: {e}")))?;

        let c: Config = cfg
            .try_deserialize()
            .map_err(|e| CryptError::Config(format!("invalid configuration: {e}")))?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<(), CryptError> {
        ensure_non_empty(&self.separated_key, "DOCSEAL_SEPARATED_KEY")?;
        ensure_non_empty(&self.aggregated_key, "DOCSEAL_AGGREGATED_KEY")?;
        ensure_non_empty(&self.log_level, "DOCSEAL_LOG_LEVEL")?;
        Ok(())
    }

    /// Decode both keys.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Config`] if a key is not valid base64 or the
    /// aggregated key has the wrong length.
    pub fn key_material(&self) -> Result<KeyMaterial, CryptError> {
        KeyMaterial::from_base64(&self.separated_key, &self.aggregated_key)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("separated_key", &"[REDACTED]")
            .field("aggregated_key", &"[REDACTED]")
            .field("separated_storage", &self.separated_storage)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<(), CryptError> {
    if value.trim().is_empty() {
        return Err(CryptError::Config(format!(
            "{name} is required and must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEPARATED: &str = "c2VwYXJhdGVkLWtleQ==";
    const AGGREGATED: &str = "QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI=";

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_log_level(), "info");
        assert_eq!(SeparatedStorage::default(), SeparatedStorage::SideMap);
    }

    #[test]
    fn loads_required_keys_with_defaults() {
        let cfg = Config::from_environment(env(&[
            ("DOCSEAL_SEPARATED_KEY", SEPARATED),
            ("DOCSEAL_AGGREGATED_KEY", AGGREGATED),
        ]))
        .unwrap();
        assert_eq!(cfg.separated_storage, SeparatedStorage::SideMap);
        assert_eq!(cfg.log_level, "info");
        let keys = cfg.key_material().unwrap();
        assert_eq!(keys.aggregated.len(), 32);
    }

    #[test]
    fn reads_inline_storage() {
        let cfg = Config::from_environment(env(&[
            ("DOCSEAL_SEPARATED_KEY", SEPARATED),
            ("DOCSEAL_AGGREGATED_KEY", AGGREGATED),
            ("DOCSEAL_SEPARATED_STORAGE", "inline"),
            ("DOCSEAL_LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(cfg.separated_storage, SeparatedStorage::Inline);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn missing_key_is_config_error() {
        let err = Config::from_environment(env(&[("DOCSEAL_SEPARATED_KEY", SEPARATED)]))
            .unwrap_err();
        assert!(matches!(err, CryptError::Config(_)));
    }

    #[test]
    fn validate_rejects_blank_key() {
        let cfg = Config {
            separated_key: "  ".into(),
            aggregated_key: AGGREGATED.into(),
            separated_storage: SeparatedStorage::default(),
            log_level: default_log_level(),
        };
        assert!(matches!(cfg.validate(), Err(CryptError::Config(_))));
    }

    #[test]
    fn short_aggregated_key_is_rejected() {
        let cfg = Config {
            separated_key: SEPARATED.into(),
            aggregated_key: "c2hvcnQ=".into(),
            separated_storage: SeparatedStorage::default(),
            log_level: default_log_level(),
        };
        assert!(matches!(cfg.key_material(), Err(CryptError::Config(_))));
    }

    #[test]
    fn debug_redacts_keys() {
        let cfg = Config {
            separated_key: SEPARATED.into(),
            aggregated_key: AGGREGATED.into(),
            separated_storage: SeparatedStorage::Inline,
            log_level: default_log_level(),
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains(SEPARATED));
        assert!(rendered.contains("REDACTED"));
    }
}
