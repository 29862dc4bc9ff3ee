//! SQL parsing and table analysis.

use crate::error::RewriteError;
use crate::statement::SqlCommand;
use sqlparser::ast::{FromTable, Statement, TableFactor, TableWithJoins, UpdateTableFromKind};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer};
use std::collections::HashMap;
use veil_core::{normalize_identifier, SqlDialect};

/// Analyzes SQL statements to extract table and alias references.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlAnalyzer {
    dialect: SqlDialect,
}

impl SqlAnalyzer {
    /// Create a new SQL analyzer for the given dialect.
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn with_dialect<R>(&self, f: impl FnOnce(&dyn Dialect) -> R) -> R {
        match self.dialect {
            SqlDialect::Mysql => f(&MySqlDialect {}),
            SqlDialect::Postgres => f(&PostgreSqlDialect {}),
            SqlDialect::Generic => f(&GenericDialect {}),
        }
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, RewriteError> {
        self.with_dialect(|dialect| Parser::parse_sql(dialect, sql))
            .map_err(|e| RewriteError::ParseError(e.to_string()))
    }

    /// Parse a SQL string that must contain exactly one statement.
    pub fn parse_single(&self, sql: &str) -> Result<Statement, RewriteError> {
        let mut statements = self.parse(sql)?;
        match statements.len() {
            1 => Ok(statements.remove(0)),
            n => Err(RewriteError::ParseError(format!(
                "expected one statement, found {n}"
            ))),
        }
    }

    /// Tokenize a SQL string, keeping token locations.
    pub fn tokenize(&self, sql: &str) -> Result<Vec<TokenWithSpan>, RewriteError> {
        self.with_dialect(|dialect| Tokenizer::new(dialect, sql).tokenize_with_location())
            .map_err(|e| RewriteError::ParseError(e.to_string()))
    }

    /// Count the placeholder tokens in a SQL string.
    pub fn placeholder_count(&self, sql: &str) -> Result<usize, RewriteError> {
        Ok(self
            .tokenize(sql)?
            .iter()
            .filter(|t| matches!(t.token, Token::Placeholder(_)))
            .count())
    }

    /// Extract the tables of a SQL string.
    ///
    /// Never fails: unparseable SQL yields an empty set, which later resolves
    /// to "nothing to encrypt".
    pub fn analyze(&self, sql: &str) -> StatementTables {
        match self.parse(sql) {
            Ok(statements) => {
                let references = statements
                    .iter()
                    .flat_map(|stmt| self.extract_tables(stmt))
                    .collect::<Vec<_>>();
                StatementTables::from_references(references)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Statement not analyzable, treating as table-less");
                StatementTables::default()
            }
        }
    }

    /// Extract table names from a statement.
    pub fn extract_tables(&self, stmt: &Statement) -> Vec<TableReference> {
        let mut tables = Vec::new();
        self.visit_statement(stmt, &mut tables);
        tables
    }

    fn visit_statement(&self, stmt: &Statement, tables: &mut Vec<TableReference>) {
        match stmt {
            Statement::Query(query) => {
                if let Some(body) = query.body.as_select() {
                    for table_with_joins in &body.from {
                        self.visit_table_with_joins(table_with_joins, tables);
                    }
                }
            }
            Statement::Insert(insert) => {
                tables.push(TableReference {
                    name: insert.table.to_string(),
                    alias: None,
                });
            }
            Statement::Update(update) => {
                self.visit_table_with_joins(&update.table, tables);
                if let Some(from) = &update.from {
                    let from_tables = match from {
                        UpdateTableFromKind::BeforeSet(t) | UpdateTableFromKind::AfterSet(t) => t,
                    };
                    for twj in from_tables {
                        self.visit_table_with_joins(twj, tables);
                    }
                }
            }
            Statement::Delete(delete) => {
                let from_tables = match &delete.from {
                    FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
                };
                for twj in from_tables {
                    self.visit_table_with_joins(twj, tables);
                }
                for twj in delete.using.iter().flatten() {
                    self.visit_table_with_joins(twj, tables);
                }
            }
            _ => {}
        }
    }

    fn visit_table_with_joins(
        &self,
        table_with_joins: &TableWithJoins,
        tables: &mut Vec<TableReference>,
    ) {
        self.visit_table_factor(&table_with_joins.relation, tables);
        for join in &table_with_joins.joins {
            self.visit_table_factor(&join.relation, tables);
        }
    }

    fn visit_table_factor(&self, table_factor: &TableFactor, tables: &mut Vec<TableReference>) {
        if let TableFactor::Table { name, alias, .. } = table_factor {
            tables.push(TableReference {
                name: name.to_string(),
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            });
        }
    }

    /// Get the command kind of a parsed statement.
    pub fn get_operation(&self, stmt: &Statement) -> SqlCommand {
        match stmt {
            Statement::Query(_) => SqlCommand::Select,
            Statement::Insert(_) => SqlCommand::Insert,
            Statement::Update(_) => SqlCommand::Update,
            Statement::Delete(_) => SqlCommand::Delete,
            _ => SqlCommand::Unknown,
        }
    }

    /// Classify a SQL string. Unparseable or multi-statement SQL is `Unknown`.
    pub fn classify(&self, sql: &str) -> SqlCommand {
        self.parse_single(sql)
            .map(|stmt| self.get_operation(&stmt))
            .unwrap_or(SqlCommand::Unknown)
    }
}

/// A reference to a table in a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    /// The table name as written (possibly schema-qualified).
    pub name: String,
    /// Optional alias.
    pub alias: Option<String>,
}

/// Tables referenced by one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementTables {
    /// Normalized table names in order of first appearance.
    pub tables: Vec<String>,
    /// Normalized table name -> normalized alias (first alias wins).
    pub aliases: HashMap<String, String>,
    /// Every reference, including repeated tables under different aliases.
    pub references: Vec<TableReference>,
}

impl StatementTables {
    pub fn from_references(references: Vec<TableReference>) -> Self {
        let mut tables = Vec::new();
        let mut aliases = HashMap::new();
        for reference in &references {
            let name = normalize_identifier(&reference.name);
            if name.is_empty() {
                continue;
            }
            if let Some(alias) = &reference.alias {
                aliases
                    .entry(name.clone())
                    .or_insert_with(|| normalize_identifier(alias));
            }
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
        Self {
            tables,
            aliases,
            references,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every alias under which `table` (normalized) appears.
    pub fn aliases_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = String> + 'a {
        self.references
            .iter()
            .filter(move |r| normalize_identifier(&r.name) == table)
            .filter_map(|r| r.alias.as_deref().map(normalize_identifier))
    }
}
