//! Configuration types for Veil.
//!
//! The encryption policy is loaded from a single YAML document (JSON is
//! accepted as well, since it is a subset of YAML):
//!
//! ```yaml
//! enabled: true
//! overwrite_plain_by_index: false
//! write_index_to_plain: false
//! naming: camel_case
//! tables:
//!   - table: users
//!     columns:
//!       - source: phone
//!         target: phone_idx
//!         indexed: true
//! ```
//!
//! The camelCase keys used by older deployments (`overwritePlainByIndex`,
//! `writeIndexToPlain`, `securityTables`, ...) are accepted as aliases.

pub mod table;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use table::{ColumnConfig, TableConfig};

/// Complete encryption policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Master switch. When false every statement passes through untouched.
    #[serde(default, alias = "enable")]
    pub enabled: bool,

    /// Send the index value instead of the ciphertext for source columns and
    /// predicates. The ciphertext then lives in the shadow column.
    #[serde(default, alias = "overwritePlainByIndex")]
    pub overwrite_plain_by_index: bool,

    /// Also bind the index value to the shadow column of indexed rules.
    #[serde(default, alias = "writeIndexToPlain")]
    pub write_index_to_plain: bool,

    /// How column names map onto result-row property names.
    #[serde(default)]
    pub naming: NamingConvention,

    /// Log every statement with its parameters inlined after preparation.
    #[serde(default, alias = "printSql")]
    pub print_sql: bool,

    /// SQL dialect used to analyze statements.
    #[serde(default)]
    pub dialect: SqlDialect,

    /// Per-table column rules.
    #[serde(default, alias = "securityTables")]
    pub tables: Vec<TableConfig>,
}

/// Mapping between column names and result-row property names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// Exact name, then a case-insensitive match.
    #[default]
    AsIs,
    /// Like `AsIs`, and additionally ignores underscores (`phone_idx` finds `phoneIdx`).
    #[serde(alias = "underscore_to_camel_case")]
    CamelCase,
}

/// SQL dialect used by the statement analyzer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Mysql,
    Postgres,
    Generic,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("column {table}.{column} is configured more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("empty {what} name in table entry #{index}")]
    EmptyName { what: &'static str, index: usize },
}

impl EncryptionConfig {
    /// Load configuration from a YAML or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML (or JSON) content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Number of configured columns across all tables.
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}
