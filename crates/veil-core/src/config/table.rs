//! Per-table encryption configuration.

use serde::{Deserialize, Serialize};

/// Encryption settings for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name. A schema prefix (`public.users`) is ignored when matching.
    #[serde(alias = "tableName")]
    pub table: String,

    /// Encrypted columns of this table.
    #[serde(default, alias = "securityColumns")]
    pub columns: Vec<ColumnConfig>,
}

/// Encryption settings for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    /// Column the application reads and writes.
    #[serde(alias = "sourceColumn", alias = "column")]
    pub source: String,

    /// Shadow column holding the index (or the ciphertext when plain values
    /// are overwritten by the index). Defaults to the source column.
    #[serde(default, alias = "targetColumn")]
    pub target: Option<String>,

    /// Whether a searchable index value is maintained for this column.
    #[serde(default)]
    pub indexed: bool,
}

impl TableConfig {
    /// Create a table entry with no columns.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column and return the entry (builder style).
    pub fn column(mut self, column: ColumnConfig) -> Self {
        self.columns.push(column);
        self
    }
}

impl ColumnConfig {
    /// Column whose ciphertext is stored in place.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: None,
            indexed: false,
        }
    }

    /// Set the shadow column.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Mark the column as indexed.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Get the effective target column name.
    pub fn target_column(&self) -> &str {
        self.target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.source)
    }
}
