//! Decrypt plans carried from statement preparation to result rewriting.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use veil_core::{normalize_identifier, EncryptionRule};

use crate::resolver::ResolvedMapping;

/// Which result properties must be decrypted after a SELECT executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptPlan {
    mapping: Arc<ResolvedMapping>,
    properties: BTreeMap<String, EncryptionRule>,
    wildcard: bool,
    /// Matched tables projected with `t.*`.
    table_wildcards: BTreeSet<String>,
    /// Columns added to the projection only to read ciphertext from.
    hidden: Vec<String>,
}

impl DecryptPlan {
    /// An empty plan over the mapping resolved for the statement.
    pub fn new(mapping: Arc<ResolvedMapping>) -> Self {
        Self {
            mapping,
            properties: BTreeMap::new(),
            wildcard: false,
            table_wildcards: BTreeSet::new(),
            hidden: Vec::new(),
        }
    }

    /// Decrypt `property` (a column name or projection alias) using `rule`.
    pub fn insert(&mut self, property: impl Into<String>, rule: EncryptionRule) {
        self.properties.insert(property.into(), rule);
    }

    /// Record a `*` projection.
    pub fn add_wildcard(&mut self) {
        self.wildcard = true;
    }

    /// Record a `t.*` projection of the matched table `table`.
    pub fn add_table_wildcard(&mut self, table: impl Into<String>) {
        self.table_wildcards.insert(table.into());
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard || !self.table_wildcards.is_empty()
    }

    /// Remove `column` from every row once decryption is done.
    pub fn add_hidden_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        if !self.hidden.contains(&column) {
            self.hidden.push(column);
        }
    }

    pub fn hidden_columns(&self) -> &[String] {
        &self.hidden
    }

    /// The mapping this plan was built from.
    pub fn mapping(&self) -> &Arc<ResolvedMapping> {
        &self.mapping
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.wildcard_rules().next().is_none()
    }

    /// `(property, rule)` pairs to decrypt.
    ///
    /// `*` expands to every rule of the resolved tables and `t.*` to the
    /// rules of `t`, keyed by source column, unless an explicit projection
    /// already covers them.
    pub fn entries(&self) -> Vec<(String, EncryptionRule)> {
        let mut entries: Vec<(String, EncryptionRule)> = self
            .properties
            .iter()
            .map(|(property, rule)| (property.clone(), rule.clone()))
            .collect();

        for rule in self.wildcard_rules() {
            let source = normalize_identifier(&rule.source_column);
            let covered = entries
                .iter()
                .any(|(property, _)| normalize_identifier(property) == source);
            if !covered {
                entries.push((rule.source_column.clone(), rule.clone()));
            }
        }

        entries
    }

    fn wildcard_rules(&self) -> Box<dyn Iterator<Item = &EncryptionRule> + '_> {
        if self.wildcard {
            Box::new(self.mapping.rules())
        } else {
            Box::new(
                self.table_wildcards
                    .iter()
                    .flat_map(|table| self.mapping.table_rules(table)),
            )
        }
    }
}
