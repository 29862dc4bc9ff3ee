//! `veil explain` command implementation.
//!
//! Runs a statement through the interceptor with a preview cipher and prints
//! what would reach the database, plus the decrypt plan for SELECTs.

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::path::PathBuf;

use veil_core::{CipherError, FieldCipher, PolicyStore};
use veil_rewrite::{BoundStatement, Interceptor, ResolvedMapping, SqlCommand, render_sql};

/// Reversible, recognisable values for previews: `enc:<base64>` and
/// `idx:<base64>`. Provides no secrecy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewCipher;

impl FieldCipher for PreviewCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        Ok(format!("enc:{}", STANDARD.encode(plaintext)))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let encoded = ciphertext
            .strip_prefix("enc:")
            .ok_or_else(|| CipherError::Decrypt("missing enc: prefix".into()))?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::Decrypt(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| CipherError::Decrypt(e.to_string()))
    }

    fn index(&self, plaintext: &str) -> Result<String, CipherError> {
        Ok(format!("idx:{}", STANDARD.encode(plaintext)))
    }

    fn scheme_name(&self) -> &str {
        "preview"
    }
}

/// Arguments of `veil explain`.
#[derive(Debug, Clone)]
pub struct ExplainArgs {
    pub config: PathBuf,
    pub sql: String,
    pub kind: Option<SqlCommand>,
    /// Parameter object as JSON.
    pub params: Option<String>,
    /// Property path of each placeholder, in order.
    pub mappings: Vec<String>,
    /// Rows to run through result decryption, as a JSON array.
    pub rows: Option<String>,
}

/// Build the statement described by the arguments.
pub fn statement(args: &ExplainArgs, interceptor: &Interceptor) -> Result<BoundStatement> {
    let parameter_object: Value = match &args.params {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON")?,
        None => Value::Null,
    };

    let mappings = if args.mappings.is_empty() {
        let count = interceptor
            .analyzer()
            .placeholder_count(&args.sql)
            .context("Failed to tokenize SQL")?;
        match (count, parameter_object.as_object()) {
            (0, _) => Vec::new(),
            // a scalar parameter object feeds a single placeholder
            (1, None) => vec!["value".to_string()],
            (n, _) => bail!("statement has {n} placeholder(s), pass --mappings to name them"),
        }
    } else {
        args.mappings.clone()
    };

    let kind = args
        .kind
        .unwrap_or_else(|| interceptor.analyzer().classify(&args.sql));
    Ok(BoundStatement::new(kind, &args.sql)
        .with_id("veil-explain")
        .with_parameters(mappings, parameter_object))
}

/// Run `veil explain`.
pub fn run(args: ExplainArgs) -> Result<()> {
    let policy = PolicyStore::load(&args.config)
        .with_context(|| format!("Failed to load policy from {}", args.config.display()))?;
    let interceptor = Interceptor::builder()
        .policy(policy)
        .cipher(PreviewCipher)
        .build()?;

    tracing::debug!(path = %args.config.display(), "Loaded encryption policy");

    let original = statement(&args, &interceptor)?;
    let tables = interceptor.analyzer().analyze(&original.sql);
    let mapping = ResolvedMapping::resolve(&tables, interceptor.policy());

    println!("Command: {}", original.command);
    println!("Tables:");
    for table in &tables.tables {
        match tables.aliases.get(table) {
            Some(alias) => println!("  {table} AS {alias}"),
            None => println!("  {table}"),
        }
    }
    if mapping.is_empty() {
        println!("Encrypted columns: none");
    } else {
        println!("Encrypted columns:");
        for rule in mapping.rules() {
            println!(
                "  {} -> {}{}",
                rule.source_column,
                rule.target_column,
                if rule.indexed { " [indexed]" } else { "" }
            );
        }
    }

    let prepared = interceptor.before_execution(&original);
    println!("\nOriginal:  {}", render_sql(&original));
    println!("Rewritten: {}", render_sql(&prepared.statement));
    if prepared.statement.sql != original.sql {
        println!("SQL:       {}", prepared.statement.sql);
    }

    println!("\nParameters:");
    for (i, mapping) in prepared.statement.parameter_mappings.iter().enumerate() {
        let value = prepared
            .statement
            .parameter_value(i)
            .cloned()
            .unwrap_or(Value::Null);
        println!("  [{i}] {} = {value}", mapping.property);
    }

    match prepared.context.plan() {
        Some(plan) => {
            println!("\nDecrypt plan:");
            for (property, rule) in plan.entries() {
                println!("  {property} <- {}", rule.source_column);
            }
        }
        None => println!("\nDecrypt plan: none"),
    }

    if let Some(raw) = &args.rows {
        let rows: Vec<Value> = serde_json::from_str(raw).context("--rows is not a JSON array")?;
        let rows = interceptor.after_execution(prepared.context, rows);
        println!("\nRows:");
        for row in rows {
            println!("  {row}");
        }
    }

    Ok(())
}
