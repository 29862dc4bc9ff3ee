//! `veil check` command implementation.
//!
//! Loads a policy file, builds the policy store from it and reports
//! settings that are valid but probably not what was intended.

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::Path;

use veil_core::{EncryptionConfig, PolicyStore, normalize_identifier};

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Where the finding applies, e.g. `users.phone`.
    pub location: String,
    pub message: String,
}

impl CheckFinding {
    fn new(severity: Severity, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Inspect a parsed configuration.
///
/// Hard errors (duplicate or blank names) are reported by
/// [`PolicyStore::from_config`]; this looks for combinations that load fine
/// but lose data or have no effect.
pub fn lint(config: &EncryptionConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    if !config.enabled {
        findings.push(CheckFinding::new(
            Severity::Warning,
            "enabled",
            "policy is disabled, every statement passes through unencrypted",
        ));
    }

    for table in &config.tables {
        if table.columns.is_empty() {
            findings.push(CheckFinding::new(
                Severity::Warning,
                &table.table,
                "table has no encrypted columns",
            ));
            continue;
        }

        let sources: HashSet<String> = table
            .columns
            .iter()
            .map(|c| normalize_identifier(&c.source))
            .collect();

        for column in &table.columns {
            let location = format!("{}.{}", table.table, column.source);
            let target = normalize_identifier(column.target_column());
            let has_shadow = target != normalize_identifier(&column.source);

            if has_shadow && sources.contains(&target) {
                findings.push(CheckFinding::new(
                    Severity::Error,
                    &location,
                    format!("shadow column `{target}` is also configured as a source column"),
                ));
            }
            if config.overwrite_plain_by_index && !has_shadow {
                findings.push(CheckFinding::new(
                    Severity::Error,
                    &location,
                    "overwrite_plain_by_index without a target column stores only index values, which cannot be decrypted",
                ));
            }
            if column.indexed && !has_shadow && config.write_index_to_plain {
                findings.push(CheckFinding::new(
                    Severity::Warning,
                    &location,
                    "indexed column has no target column, no index value is written",
                ));
            }
            if column.indexed && !config.write_index_to_plain && !config.overwrite_plain_by_index {
                findings.push(CheckFinding::new(
                    Severity::Info,
                    &location,
                    "indexed has no effect unless write_index_to_plain or overwrite_plain_by_index is set",
                ));
            }
        }
    }

    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    findings
}

/// Run `veil check`.
pub fn run(config_path: &Path) -> Result<()> {
    let config = EncryptionConfig::from_file(config_path)
        .with_context(|| format!("Failed to load policy from {}", config_path.display()))?;
    let store = PolicyStore::from_config(&config).context("Invalid encryption policy")?;
    tracing::debug!(path = %config_path.display(), tables = config.tables.len(), "Policy parsed");

    println!("Policy: {}", config_path.display());
    println!(
        "  enabled: {}  overwrite_plain_by_index: {}  write_index_to_plain: {}",
        config.enabled, config.overwrite_plain_by_index, config.write_index_to_plain
    );
    println!(
        "  naming: {:?}  dialect: {:?}  print_sql: {}",
        config.naming, config.dialect, config.print_sql
    );
    println!(
        "  {} table(s), {} encrypted column(s)",
        config.tables.len(),
        config.column_count()
    );

    let mut tables: Vec<_> = store.tables().collect();
    tables.sort_by(|a, b| a.0.cmp(b.0));
    for (name, policy) in tables {
        println!("\n  {name} ({} column(s))", policy.len());
        let mut rules: Vec<_> = policy.iter().map(|(_, rule)| rule).collect();
        rules.sort_by(|a, b| a.source_column.cmp(&b.source_column));
        for rule in rules {
            let target = if rule.has_shadow() {
                format!(" -> {}", rule.target_column)
            } else {
                String::new()
            };
            let indexed = if rule.indexed { " [indexed]" } else { "" };
            println!("    {}{target}{indexed}", rule.source_column);
        }
    }

    let findings = lint(&config);
    if !findings.is_empty() {
        println!();
        for finding in &findings {
            println!(
                "  {:<5} [{}] {}",
                finding.severity, finding.location, finding.message
            );
        }
    }

    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    if errors > 0 {
        bail!("policy has {errors} error(s)");
    }

    println!("\nPolicy OK");
    Ok(())
}
