//! The resolved, read-only encryption policy.
//!
//! A [`PolicyStore`] is built once from an [`EncryptionConfig`] and then
//! shared (behind an `Arc`) by every statement execution. It is never
//! mutated after construction.

use std::collections::HashMap;
use std::path::Path;

use crate::config::{ConfigError, EncryptionConfig, NamingConvention, SqlDialect};

/// One encrypted column of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRule {
    /// Column the application reads and writes.
    pub source_column: String,
    /// Shadow column; equal to `source_column` when there is none.
    pub target_column: String,
    /// Whether an index value is maintained.
    pub indexed: bool,
}

impl EncryptionRule {
    pub fn new(source: impl Into<String>, target: impl Into<String>, indexed: bool) -> Self {
        Self {
            source_column: source.into(),
            target_column: target.into(),
            indexed,
        }
    }

    /// Whether the rule writes to a separate shadow column.
    pub fn has_shadow(&self) -> bool {
        normalize_identifier(&self.source_column) != normalize_identifier(&self.target_column)
    }
}

/// Rules of a single table, keyed by normalized source column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePolicy {
    rules: HashMap<String, EncryptionRule>,
}

impl TablePolicy {
    /// Look up the rule for a column (qualifiers and quoting are ignored).
    pub fn get(&self, column: &str) -> Option<&EncryptionRule> {
        self.rules.get(&normalize_identifier(column))
    }

    /// Iterate over `(normalized source column, rule)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &EncryptionRule)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn insert(&mut self, table: &str, rule: EncryptionRule) -> Result<(), ConfigError> {
        let key = normalize_identifier(&rule.source_column);
        if self.rules.contains_key(&key) {
            return Err(ConfigError::DuplicateColumn {
                table: table.to_string(),
                column: rule.source_column,
            });
        }
        self.rules.insert(key, rule);
        Ok(())
    }
}

/// Global switches that shape how values are rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyFlags {
    pub enabled: bool,
    pub overwrite_plain_by_index: bool,
    pub write_index_to_plain: bool,
}

/// Table name -> [`TablePolicy`], plus the global flags.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    tables: HashMap<String, TablePolicy>,
    flags: PolicyFlags,
    naming: NamingConvention,
    dialect: SqlDialect,
    print_sql: bool,
}

impl PolicyStore {
    /// A store that matches nothing. Every statement passes through.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the store from a parsed configuration.
    ///
    /// Fails when a table or column name is blank, or when a column is
    /// configured twice for the same table.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, ConfigError> {
        let mut tables: HashMap<String, TablePolicy> = HashMap::new();

        for (index, table) in config.tables.iter().enumerate() {
            let table_key = normalize_identifier(&table.table);
            if table_key.is_empty() {
                return Err(ConfigError::EmptyName {
                    what: "table",
                    index,
                });
            }
            if table.columns.is_empty() {
                tracing::debug!(table = %table.table, "Table has no encrypted columns, skipping");
                continue;
            }

            let policy = tables.entry(table_key).or_default();
            for column in &table.columns {
                if normalize_identifier(&column.source).is_empty() {
                    return Err(ConfigError::EmptyName {
                        what: "column",
                        index,
                    });
                }
                policy.insert(
                    &table.table,
                    EncryptionRule::new(
                        column.source.trim(),
                        column.target_column().trim(),
                        column.indexed,
                    ),
                )?;
            }
        }

        Ok(Self {
            tables,
            flags: PolicyFlags {
                enabled: config.enabled,
                overwrite_plain_by_index: config.overwrite_plain_by_index,
                write_index_to_plain: config.write_index_to_plain,
            },
            naming: config.naming,
            dialect: config.dialect,
            print_sql: config.print_sql,
        })
    }

    /// Load and build the store from a YAML or JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = EncryptionConfig::from_file(path)?;
        Self::from_config(&config)
    }

    /// Load the store, falling back to an empty (pass-through) store when the
    /// file is absent or malformed.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(store) => {
                tracing::info!(
                    path = %path.display(),
                    tables = store.tables.len(),
                    enabled = store.flags.enabled,
                    "Loaded encryption policy"
                );
                store
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Encryption policy unavailable, statements will pass through unencrypted"
                );
                Self::empty()
            }
        }
    }

    /// True when statements may be rewritten at all.
    pub fn is_active(&self) -> bool {
        self.flags.enabled && !self.tables.is_empty()
    }

    /// Look up the policy for a table (schema prefix and quoting are ignored).
    pub fn table(&self, name: &str) -> Option<&TablePolicy> {
        self.tables.get(&normalize_identifier(name))
    }

    /// Iterate over `(normalized table name, policy)` pairs.
    pub fn tables(&self) -> impl Iterator<Item = (&String, &TablePolicy)> {
        self.tables.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn flags(&self) -> PolicyFlags {
        self.flags
    }

    pub fn naming(&self) -> NamingConvention {
        self.naming
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn print_sql(&self) -> bool {
        self.print_sql
    }
}

/// Normalize a table or column reference for policy lookups.
///
/// Keeps only the last dotted segment, strips identifier quotes and
/// lowercases: `public."Users"` becomes `users`.
pub fn normalize_identifier(name: &str) -> String {
    let last = name.trim().rsplit('.').next().unwrap_or_default();
    last.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_ascii_lowercase()
}
