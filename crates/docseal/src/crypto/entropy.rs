//! IV generation. The only step of encryption that may block.

use std::sync::Arc;

use aes_gcm_siv::aead::OsRng;
use common::{protocol::IV_LEN, CryptError};
use thiserror::Error;

/// The entropy source could not produce random bytes.
#[derive(Debug, Error)]
#[error("entropy source failure: {0}")]
pub struct EntropyError(pub String);

/// A source of cryptographically secure random bytes.
#[cfg_attr(test, mockall::automock)]
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError>;
}

/// The operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        use aes_gcm_siv::aead::rand_core::RngCore;
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| EntropyError(e.to_string()))
    }
}

/// Draw a fresh IV from `source` on the blocking pool.
///
/// # Errors
///
/// Returns [`CryptError::KeyMaterial`] if the source fails or the blocking task
/// is lost.
pub async fn generate_iv(source: Arc<dyn EntropySource>) -> Result<[u8; IV_LEN], CryptError> {
    tokio::task::spawn_blocking(move || {
        let mut iv = [0u8; IV_LEN];
        source.fill(&mut iv).map(|()| iv)
    })
    .await
    .map_err(|e| CryptError::KeyMaterial(format!("IV generation task failed: {e}")))?
    .map_err(|e| CryptError::KeyMaterial(e.to_string()))
}
