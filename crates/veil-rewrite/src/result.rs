//! Decryption of returned rows.

use serde_json::{Map, Value};
use veil_core::{EncryptionRule, FieldCipher, NamingConvention, PolicyFlags};

use crate::plan::DecryptPlan;

/// Counters reported after rewriting a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub rows: usize,
    pub decrypted: usize,
    /// Values that failed to decrypt and were replaced by `null`.
    pub failed: usize,
}

/// Decrypts the properties a [`DecryptPlan`] names, in place.
pub struct ResultRewriter<'a> {
    cipher: &'a dyn FieldCipher,
    naming: NamingConvention,
    flags: PolicyFlags,
}

impl<'a> ResultRewriter<'a> {
    pub fn new(cipher: &'a dyn FieldCipher, naming: NamingConvention, flags: PolicyFlags) -> Self {
        Self {
            cipher,
            naming,
            flags,
        }
    }

    /// Decrypt every planned property of every object row, then drop the
    /// columns the plan projected only to read ciphertext from.
    ///
    /// Rows that are not JSON objects are left alone.
    pub fn rewrite(&self, rows: &mut [Value], plan: &DecryptPlan) -> RewriteStats {
        let entries = plan.entries();
        let mut stats = RewriteStats::default();
        if entries.is_empty() {
            return stats;
        }

        for row in rows.iter_mut() {
            let Value::Object(fields) = row else {
                continue;
            };
            stats.rows += 1;
            for (property, rule) in &entries {
                self.rewrite_field(fields, property, rule, &mut stats);
            }
            for hidden in plan.hidden_columns() {
                if let Some(key) = find_property(fields, hidden, self.naming) {
                    fields.remove(&key);
                }
            }
        }

        stats
    }

    fn rewrite_field(
        &self,
        fields: &mut Map<String, Value>,
        property: &str,
        rule: &EncryptionRule,
        stats: &mut RewriteStats,
    ) {
        let output = find_property(fields, property, self.naming);
        let shadow = if rule.has_shadow() {
            find_property(fields, &rule.target_column, self.naming)
        } else {
            None
        };

        let source = if self.flags.overwrite_plain_by_index && rule.has_shadow() {
            shadow.clone().or_else(|| output.clone())
        } else {
            output.clone().or_else(|| shadow.clone())
        };
        let Some(source) = source else {
            return;
        };
        let ciphertext = match fields.get(&source) {
            Some(Value::String(s)) => s.clone(),
            _ => return,
        };
        let output = output.unwrap_or_else(|| property.to_string());

        match self.cipher.decrypt(&ciphertext) {
            Ok(plaintext) => {
                fields.insert(output, Value::String(plaintext));
                stats.decrypted += 1;
            }
            Err(e) => {
                tracing::warn!(
                    property = %output,
                    column = %rule.source_column,
                    error = %e,
                    "Failed to decrypt field, returning null"
                );
                fields.insert(output, Value::Null);
                stats.failed += 1;
            }
        }
    }
}

/// Find the key of `fields` that holds `name`.
///
/// Exact match first, then case-insensitive; `CamelCase` additionally
/// ignores underscores.
pub fn find_property(
    fields: &Map<String, Value>,
    name: &str,
    naming: NamingConvention,
) -> Option<String> {
    if fields.contains_key(name) {
        return Some(name.to_string());
    }
    if let Some(key) = fields.keys().find(|k| k.eq_ignore_ascii_case(name)) {
        return Some(key.clone());
    }
    match naming {
        NamingConvention::AsIs => None,
        NamingConvention::CamelCase => {
            let wanted = squash(name);
            fields.keys().find(|k| squash(k) == wanted).cloned()
        }
    }
}

fn squash(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
