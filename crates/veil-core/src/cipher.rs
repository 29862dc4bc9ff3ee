//! The cryptographic capability injected into the pipeline.
//!
//! Veil never implements a cipher itself. Callers provide a [`FieldCipher`]
//! that turns plaintext into ciphertext and back, and optionally a separate
//! deterministic index transform used for equality lookups.

use std::sync::Arc;

/// Errors returned by a [`FieldCipher`].
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The value could not be encrypted.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// The value could not be decrypted (wrong key, corrupt or plaintext data).
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// The index value could not be computed.
    #[error("index computation failed: {0}")]
    Index(String),
}

/// String-to-string field encryption.
///
/// `encrypt` must be deterministic for predicate rewriting to match stored
/// ciphertext, unless the deployment filters by index values instead.
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;

    /// Deterministic lookup value for `plaintext`. Defaults to `encrypt`.
    fn index(&self, plaintext: &str) -> Result<String, CipherError> {
        self.encrypt(plaintext)
    }

    /// Name used in log lines.
    fn scheme_name(&self) -> &str {
        "custom"
    }
}

impl<T: FieldCipher + ?Sized> FieldCipher for Arc<T> {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        (**self).encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        (**self).decrypt(ciphertext)
    }

    fn index(&self, plaintext: &str) -> Result<String, CipherError> {
        (**self).index(plaintext)
    }

    fn scheme_name(&self) -> &str {
        (**self).scheme_name()
    }
}
