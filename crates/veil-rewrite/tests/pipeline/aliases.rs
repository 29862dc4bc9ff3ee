//! Table aliases, aliased projections and wildcard projections.

use pretty_assertions::assert_eq;
use serde_json::json;
use veil_rewrite::{BoundStatement, SqlCommand};

use crate::common::{MemoryDb, interceptor, users_config};

fn seed_orders(db: &MemoryDb) {
    let veil = interceptor(&users_config());
    let insert = BoundStatement::new(
        SqlCommand::Insert,
        "INSERT INTO orders (id, ssn) VALUES (?, ?), (?, ?)",
    )
    .with_parameters(["a.id", "a.ssn", "b.id", "b.ssn"], json!({
        "a": {"id": 1, "ssn": "123-45"},
        "b": {"id": 2, "ssn": "678-90"},
    }));
    veil.execute(&insert, |s| db.run(s)).unwrap();
}

#[test]
fn test_aliased_predicate_is_encrypted_like_unaliased() {
    let veil = interceptor(&users_config());
    let aliased = BoundStatement::new(SqlCommand::Select, "SELECT o.id FROM orders o WHERE o.ssn = ?")
        .with_parameters(["ssn"], json!({"ssn": "123-45"}));
    let plain = BoundStatement::new(SqlCommand::Select, "SELECT id FROM orders WHERE ssn = ?")
        .with_parameters(["ssn"], json!({"ssn": "123-45"}));

    let aliased = veil.before_execution(&aliased);
    let plain = veil.before_execution(&plain);
    assert_eq!(aliased.statement.bound_parameters(), vec![json!("enc:54-321")]);
    assert_eq!(
        aliased.statement.bound_parameters(),
        plain.statement.bound_parameters()
    );
}

#[test]
fn test_column_qualified_by_other_table_is_not_encrypted() {
    let veil = interceptor(&users_config());
    let stmt = BoundStatement::new(
        SqlCommand::Select,
        "SELECT o.id FROM orders o JOIN products p ON p.id = o.product_id WHERE p.ssn = ?",
    )
    .with_parameters(["ssn"], json!({"ssn": "123-45"}));

    let prepared = veil.before_execution(&stmt);
    assert_eq!(prepared.statement.bound_parameters(), vec![json!("123-45")]);
}

#[test]
fn test_aliased_projection_is_decrypted() {
    let db = MemoryDb::new();
    seed_orders(&db);
    let veil = interceptor(&users_config());

    let select = BoundStatement::new(
        SqlCommand::Select,
        "SELECT o.id, o.ssn AS taxId FROM orders o WHERE o.id = ?",
    )
    .with_parameters(["id"], json!(2));
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(rows, vec![json!({"id": 2, "taxId": "678-90"})]);
}

#[test]
fn test_wildcard_decrypts_every_row() {
    let db = MemoryDb::new();
    seed_orders(&db);
    let veil = interceptor(&users_config());

    let select = BoundStatement::new(SqlCommand::Select, "SELECT * FROM orders");
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"id": 1, "ssn": "123-45"}),
            json!({"id": 2, "ssn": "678-90"}),
        ]
    );
}

#[test]
fn test_wildcard_of_unconfigured_joined_table_is_untouched() {
    let veil = interceptor(&users_config());
    let select = BoundStatement::new(
        SqlCommand::Select,
        "SELECT u.id, c.* FROM users u JOIN contacts c ON c.user_id = u.id WHERE u.id = ?",
    )
    .with_parameters(["id"], json!(1));

    let rows = veil
        .execute(&select, |_| {
            Ok::<_, String>(vec![json!({"id": 1, "user_id": 1, "phone": "555-plain"})])
        })
        .unwrap();
    assert_eq!(rows, vec![json!({"id": 1, "user_id": 1, "phone": "555-plain"})]);
}

#[test]
fn test_wildcard_of_configured_joined_table_is_decrypted() {
    let veil = interceptor(&users_config());
    let select = BoundStatement::new(
        SqlCommand::Select,
        "SELECT c.name, u.* FROM users u JOIN contacts c ON c.user_id = u.id",
    );

    let rows = veil
        .execute(&select, |_| {
            Ok::<_, String>(vec![json!({"name": "ada", "id": 1, "phone": "enc:111"})])
        })
        .unwrap();
    assert_eq!(rows, vec![json!({"name": "ada", "id": 1, "phone": "111"})]);
}

#[test]
fn test_camel_case_result_properties() {
    let mut config = users_config();
    config.naming = veil_core::NamingConvention::CamelCase;
    config.tables = vec![
        veil_core::TableConfig::new("users")
            .column(veil_core::ColumnConfig::new("mobile_phone")),
    ];
    let veil = interceptor(&config);

    let select = BoundStatement::new(SqlCommand::Select, "SELECT * FROM users");
    let rows = veil
        .execute(&select, |_| {
            Ok::<_, String>(vec![json!({"id": 1, "mobilePhone": "enc:111"})])
        })
        .unwrap();
    assert_eq!(rows, vec![json!({"id": 1, "mobilePhone": "111"})]);
}
