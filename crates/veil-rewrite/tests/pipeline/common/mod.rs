//! Shared fixtures: a reversible test cipher and a tiny in-memory engine.

use serde_json::{Map, Value};
use sqlparser::ast::{
    AssignmentTarget, BinaryOperator, Expr, SelectItem, SetExpr, Statement, TableFactor,
    Value as SqlValue,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::sync::Mutex;
use veil_core::{CipherError, ColumnConfig, EncryptionConfig, FieldCipher, PolicyStore, TableConfig};
use veil_rewrite::{BoundStatement, Interceptor};

/// Deterministic, reversible and recognisable: `abc` -> `enc:cba`.
pub struct ReverseCipher;

impl FieldCipher for ReverseCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.contains("unencryptable") {
            return Err(CipherError::Encrypt("refused".into()));
        }
        Ok(format!("enc:{}", plaintext.chars().rev().collect::<String>()))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        ciphertext
            .strip_prefix("enc:")
            .map(|s| s.chars().rev().collect())
            .ok_or_else(|| CipherError::Decrypt(format!("not a ciphertext: {ciphertext}")))
    }

    fn index(&self, plaintext: &str) -> Result<String, CipherError> {
        Ok(format!("idx:{plaintext}"))
    }

    fn scheme_name(&self) -> &str {
        "reverse"
    }
}

pub fn users_config() -> EncryptionConfig {
    EncryptionConfig {
        enabled: true,
        tables: vec![
            TableConfig::new("users").column(ColumnConfig::new("phone").with_target("phone_idx")),
            TableConfig::new("orders").column(ColumnConfig::new("ssn")),
        ],
        ..Default::default()
    }
}

pub fn interceptor(config: &EncryptionConfig) -> Interceptor {
    Interceptor::builder()
        .policy(PolicyStore::from_config(config).unwrap())
        .cipher(ReverseCipher)
        .build()
        .unwrap()
}

type Row = Map<String, Value>;

/// Executes the narrow SQL subset the tests use: multi-row INSERT,
/// UPDATE/SELECT/DELETE with at most one equality filter.
#[derive(Default)]
pub struct MemoryDb {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    executed: Mutex<Vec<BoundStatement>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows exactly as stored, i.e. as the database would see them.
    pub fn stored(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Every statement handed to the engine, in order.
    pub fn executed(&self) -> Vec<BoundStatement> {
        self.executed.lock().unwrap().clone()
    }

    pub fn run(&self, stmt: &BoundStatement) -> Result<Vec<Value>, String> {
        self.executed.lock().unwrap().push(stmt.clone());

        let parsed = Parser::parse_sql(&MySqlDialect {}, &stmt.sql)
            .map_err(|e| e.to_string())?
            .pop()
            .ok_or("no statement")?;
        let mut params = stmt.bound_parameters().into_iter();
        let mut tables = self.tables.lock().unwrap();

        match parsed {
            Statement::Insert(insert) => {
                let columns: Vec<String> = insert.columns.iter().map(|c| c.to_string()).collect();
                let Some(SetExpr::Values(values)) = insert.source.as_deref().map(|q| q.body.as_ref())
                else {
                    return Err("INSERT without VALUES".into());
                };
                let rows = tables.entry(insert.table.to_string()).or_default();
                for exprs in &values.rows {
                    let mut row = Row::new();
                    for (column, expr) in columns.iter().zip(exprs) {
                        row.insert(column.clone(), value_of(expr, &mut params)?);
                    }
                    rows.push(row);
                }
                Ok(Vec::new())
            }
            Statement::Update(update) => {
                let table = table_name(&update.table.relation)?;
                let mut sets = Vec::new();
                for assignment in &update.assignments {
                    let AssignmentTarget::ColumnName(name) = &assignment.target else {
                        return Err("unsupported assignment".into());
                    };
                    let column = name.to_string().rsplit('.').next().unwrap_or_default().to_string();
                    sets.push((column, value_of(&assignment.value, &mut params)?));
                }
                let filter = filter_of(update.selection.as_ref(), &mut params)?;
                for row in tables.entry(table).or_default().iter_mut() {
                    if matches(row, &filter) {
                        for (column, value) in &sets {
                            row.insert(column.clone(), value.clone());
                        }
                    }
                }
                Ok(Vec::new())
            }
            Statement::Delete(delete) => {
                let table = match &delete.from {
                    sqlparser::ast::FromTable::WithFromKeyword(t)
                    | sqlparser::ast::FromTable::WithoutKeyword(t) => {
                        table_name(&t.first().ok_or("no table")?.relation)?
                    }
                };
                let filter = filter_of(delete.selection.as_ref(), &mut params)?;
                tables.entry(table).or_default().retain(|row| !matches(row, &filter));
                Ok(Vec::new())
            }
            Statement::Query(query) => {
                let select = query.body.as_select().ok_or("unsupported query")?;
                let table = table_name(&select.from.first().ok_or("no FROM")?.relation)?;
                let filter = filter_of(select.selection.as_ref(), &mut params)?;
                let rows = tables.get(&table).cloned().unwrap_or_default();
                rows.iter()
                    .filter(|row| matches(row, &filter))
                    .map(|row| project(row, &select.projection))
                    .collect()
            }
            other => Err(format!("unsupported statement: {other}")),
        }
    }
}

fn table_name(factor: &TableFactor) -> Result<String, String> {
    match factor {
        TableFactor::Table { name, .. } => Ok(name.to_string()),
        _ => Err("unsupported table factor".into()),
    }
}

fn value_of(expr: &Expr, params: &mut impl Iterator<Item = Value>) -> Result<Value, String> {
    let Expr::Value(value) = expr else {
        return Err(format!("unsupported expression: {expr}"));
    };
    match &value.value {
        SqlValue::Placeholder(_) => params.next().ok_or_else(|| "missing parameter".to_string()),
        SqlValue::Number(n, _) => n.parse::<i64>().map(Value::from).map_err(|e| e.to_string()),
        SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        SqlValue::Null => Ok(Value::Null),
        other => Err(format!("unsupported literal: {other}")),
    }
}

fn column_name(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| "empty identifier".to_string()),
        _ => Err(format!("unsupported column: {expr}")),
    }
}

fn filter_of(
    selection: Option<&Expr>,
    params: &mut impl Iterator<Item = Value>,
) -> Result<Option<(String, Value)>, String> {
    match selection {
        None => Ok(None),
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) => Ok(Some((column_name(left)?, value_of(right, params)?))),
        Some(other) => Err(format!("unsupported filter: {other}")),
    }
}

fn matches(row: &Row, filter: &Option<(String, Value)>) -> bool {
    match filter {
        None => true,
        Some((column, value)) => row.get(column) == Some(value),
    }
}

fn project(row: &Row, projection: &[SelectItem]) -> Result<Value, String> {
    let mut out = Row::new();
    for item in projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                out.extend(row.clone());
            }
            SelectItem::UnnamedExpr(expr) => {
                let column = column_name(expr)?;
                let value = row.get(&column).cloned().unwrap_or(Value::Null);
                out.insert(column, value);
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let value = row.get(&column_name(expr)?).cloned().unwrap_or(Value::Null);
                out.insert(alias.value.clone(), value);
            }
        }
    }
    Ok(Value::Object(out))
}
