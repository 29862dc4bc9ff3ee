//! # veil-core
//!
//! Policy configuration and the cipher capability shared by the Veil crates.
//!
//! - [`config`]: the YAML/JSON policy document
//! - [`policy`]: the read-only [`PolicyStore`] built from it
//! - [`cipher`]: the [`FieldCipher`] trait implemented by callers

pub mod cipher;
pub mod config;
pub mod policy;

pub use cipher::{CipherError, FieldCipher};
pub use config::{
    ColumnConfig, ConfigError, EncryptionConfig, NamingConvention, SqlDialect, TableConfig,
};
pub use policy::{normalize_identifier, EncryptionRule, PolicyFlags, PolicyStore, TablePolicy};
