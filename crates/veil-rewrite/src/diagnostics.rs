//! Human-readable rendering of prepared statements.

use serde_json::Value;

use crate::statement::BoundStatement;

/// Render a statement with its parameters inlined, on a single line.
///
/// Placeholders inside quoted literals are left alone. This is for logs
/// only and is never sent to a database.
pub fn render_sql(statement: &BoundStatement) -> String {
    let sql = statement.sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut ordinal = 0;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' || c == '`' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '?' => {
                let rendered = if ordinal < statement.parameter_mappings.len() {
                    statement
                        .parameter_value(ordinal)
                        .map(render_value)
                        .unwrap_or_else(|| "<missing>".to_string())
                } else {
                    "<missing>".to_string()
                };
                out.push_str(&rendered);
                ordinal += 1;
            }
            None => out.push(c),
        }
    }

    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("'{other}'"),
    }
}
