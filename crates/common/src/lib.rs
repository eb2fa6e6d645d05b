//! Shared error taxonomy and storage vocabulary for the `docseal` crates.

pub mod error;
pub mod protocol;

pub use error::CryptError;
pub use protocol::{EncryptionMode, SeparatedStorage};
