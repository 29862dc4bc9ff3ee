//! Intersection of a statement's tables with the encryption policy.

use std::collections::{BTreeMap, HashMap};
use veil_core::{normalize_identifier, EncryptionRule, PolicyStore};

use crate::analyzer::StatementTables;

/// A column reference as written in a statement (`ssn`, `o.ssn`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Table name or alias qualifying the column, if any.
    pub qualifier: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(qualifier: Option<&str>, column: &str) -> Self {
        Self {
            qualifier: qualifier.map(str::to_string),
            column: column.to_string(),
        }
    }

    /// Split a dotted reference: `o.ssn` -> qualifier `o`, column `ssn`.
    pub fn parse(reference: &str) -> Self {
        let mut parts = reference.rsplitn(3, '.');
        let column = parts.next().unwrap_or_default();
        let qualifier = parts.next();
        Self::new(qualifier, column)
    }
}

/// The part of the policy relevant to one statement.
///
/// Built once per statement and shared (behind an `Arc`) by the parameter
/// rewriting and the result decryption of that statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMapping {
    rules: BTreeMap<String, EncryptionRule>,
    tables: Vec<String>,
    aliases: HashMap<String, String>,
    /// Table name or alias -> matched table.
    qualifiers: BTreeMap<String, String>,
    /// Each matched table's own rules, for `t.*` projections.
    table_rules: BTreeMap<String, Vec<EncryptionRule>>,
}

impl ResolvedMapping {
    /// Merge the policies of every configured table the statement references.
    ///
    /// When two matched tables configure the same column name, the table
    /// appearing later in the statement wins.
    pub fn resolve(tables: &StatementTables, policy: &PolicyStore) -> Self {
        let mut mapping = Self::default();

        for table in &tables.tables {
            let Some(table_policy) = policy.table(table) else {
                continue;
            };

            let mut own = Vec::new();
            for (column, rule) in table_policy.iter() {
                own.push(rule.clone());
                if let Some(previous) = mapping.rules.insert(column.clone(), rule.clone()) {
                    if &previous != rule {
                        tracing::debug!(
                            table = %table,
                            column = %column,
                            "Column configured on several referenced tables, last table wins"
                        );
                    }
                }
            }

            own.sort_by(|a, b| a.source_column.cmp(&b.source_column));
            mapping.table_rules.insert(table.clone(), own);
            mapping.tables.push(table.clone());
            mapping.qualifiers.insert(table.clone(), table.clone());
            for alias in tables.aliases_of(table) {
                mapping.qualifiers.insert(alias, table.clone());
            }
            if let Some(alias) = tables.aliases.get(table) {
                mapping.aliases.insert(table.clone(), alias.clone());
            }
        }

        mapping
    }

    /// True when at least one referenced column may need rewriting.
    pub fn needs_processing(&self) -> bool {
        !self.rules.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule for an unqualified column name.
    pub fn rule(&self, column: &str) -> Option<&EncryptionRule> {
        self.rules.get(&normalize_identifier(column))
    }

    /// Rule for a column reference. A qualified reference only matches when
    /// its qualifier names a matched table or one of its aliases.
    pub fn rule_for(&self, column: &ColumnRef) -> Option<&EncryptionRule> {
        if let Some(qualifier) = &column.qualifier {
            self.table_for(qualifier)?;
        }
        self.rule(&column.column)
    }

    /// The matched table a qualifier (table name or alias) refers to.
    pub fn table_for(&self, qualifier: &str) -> Option<&str> {
        self.qualifiers
            .get(&normalize_identifier(qualifier))
            .map(String::as_str)
    }

    /// Rules configured on one matched table, ordered by source column.
    pub fn table_rules(&self, table: &str) -> &[EncryptionRule] {
        self.table_rules
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every rule, ordered by source column.
    pub fn rules(&self) -> impl Iterator<Item = &EncryptionRule> {
        self.rules.values()
    }

    /// Matched tables, in statement order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Matched table -> alias.
    pub fn aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }
}
