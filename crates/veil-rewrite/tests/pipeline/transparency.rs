//! Policies that match nothing change nothing.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use veil_core::PolicyStore;
use veil_rewrite::{BoundStatement, Interceptor, SqlCommand};

use crate::common::{ReverseCipher, interceptor, users_config};

fn statements() -> Vec<BoundStatement> {
    vec![
        BoundStatement::new(SqlCommand::Insert, "INSERT INTO users (id, phone) VALUES (?, ?)")
            .with_parameters(["id", "phone"], json!({"id": 1, "phone": "111"})),
        BoundStatement::new(SqlCommand::Update, "UPDATE users SET phone = ? WHERE id = ?")
            .with_parameters(["phone", "id"], json!({"phone": "111", "id": 1})),
        BoundStatement::new(SqlCommand::Select, "SELECT * FROM users WHERE phone = ?")
            .with_parameters(["phone"], json!("111")),
        BoundStatement::new(SqlCommand::Delete, "DELETE FROM orders WHERE ssn = ?")
            .with_parameters(["ssn"], json!("123")),
    ]
}

fn rows() -> Vec<Value> {
    vec![
        json!({"id": 1, "phone": "enc:111", "ssn": "enc:321"}),
        json!({"id": 2, "phone": null}),
    ]
}

fn assert_transparent(veil: &Interceptor) {
    for stmt in statements() {
        let prepared = veil.before_execution(&stmt);
        assert_eq!(prepared.statement, stmt);
        assert!(prepared.context.plan().is_none());
        assert_eq!(veil.after_execution(prepared.context, rows()), rows());
    }
}

#[test]
fn test_disabled_policy() {
    let mut config = users_config();
    config.enabled = false;
    assert_transparent(&interceptor(&config));
}

#[test]
fn test_empty_policy() {
    let veil = Interceptor::builder()
        .policy(PolicyStore::empty())
        .cipher(ReverseCipher)
        .build()
        .unwrap();
    assert_transparent(&veil);
}

#[test]
fn test_missing_policy_file() {
    let veil = Interceptor::builder()
        .policy(PolicyStore::load_or_empty("/nonexistent/veil.yaml"))
        .cipher(ReverseCipher)
        .build()
        .unwrap();
    assert_transparent(&veil);
}

#[test]
fn test_unconfigured_tables_are_untouched() {
    let veil = interceptor(&users_config());
    let stmt = BoundStatement::new(SqlCommand::Select, "SELECT phone FROM contacts WHERE phone = ?")
        .with_parameters(["phone"], json!("111"));

    let prepared = veil.before_execution(&stmt);
    assert_eq!(prepared.statement, stmt);
    assert_eq!(veil.after_execution(prepared.context, rows()), rows());
}

#[test]
fn test_unsupported_statement_kinds_are_untouched() {
    let veil = interceptor(&users_config());
    let stmt = BoundStatement::new(SqlCommand::Unknown, "TRUNCATE TABLE users");
    let prepared = veil.before_execution(&stmt);
    assert_eq!(prepared.statement, stmt);
}
