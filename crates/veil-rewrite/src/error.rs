//! Error types for the rewrite crate.
//!
//! None of these reach the caller of the interception hooks: the
//! [`Interceptor`](crate::Interceptor) logs them and falls back to the
//! unmodified statement or rows.

use thiserror::Error;
use veil_core::CipherError;

/// Errors that can occur while rewriting a statement or its results.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    ParseError(String),

    /// The SQL placeholders do not line up with the parameter mappings.
    #[error("statement has {placeholders} placeholders but {mappings} parameter mappings")]
    PlaceholderMismatch { placeholders: usize, mappings: usize },

    /// A placeholder could not be located in the SQL text.
    #[error("cannot locate placeholder {placeholder} in statement")]
    UnlocatedPlaceholder { placeholder: String },

    /// The statement kind does not match the parsed SQL.
    #[error("expected a {expected} statement, found: {found}")]
    CommandMismatch { expected: String, found: String },

    /// The interceptor was built without a cipher.
    #[error("no field cipher configured")]
    MissingCipher,

    /// The injected cipher failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
