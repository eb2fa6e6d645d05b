//! `docseal`: transparent field-level encryption for structured records.
//!
//! A [`Schema`] declares which fields are encrypted and how:
//!
//! - **separated** fields are encrypted one by one with a deterministic
//!   codec, so equal plaintexts give equal ciphertexts and remain searchable;
//! - **aggregated** fields are serialised together into one randomised,
//!   authenticated blob held in `_ct`.
//!
//! [`DocumentCrypto`] performs encryption and decryption over a [`Record`];
//! the [`lifecycle`] functions wire it into a host's load/save events.

pub mod config;
pub mod controller;
pub mod crypto;
pub mod keys;
pub mod lifecycle;
pub mod record;
pub mod schema;

pub use common::{CryptError, EncryptionMode, SeparatedStorage};
pub use config::Config;
pub use controller::DocumentCrypto;
pub use keys::{KeyMaterial, SecretKey};
pub use record::{Record, RecordKind};
pub use schema::{FieldDef, FieldType, Schema, SchemaBuilder, SchemaRegistry};
