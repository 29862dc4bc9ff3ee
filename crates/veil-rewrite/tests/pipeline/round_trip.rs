//! Values written through the pipeline come back as plaintext.

use pretty_assertions::assert_eq;
use serde_json::json;
use veil_core::{ColumnConfig, EncryptionConfig, TableConfig};
use veil_rewrite::{BoundStatement, SqlCommand};

use crate::common::{MemoryDb, interceptor, users_config};

fn insert_user(id: i64, phone: &str) -> BoundStatement {
    BoundStatement::new(SqlCommand::Insert, "INSERT INTO users (id, phone) VALUES (?, ?)")
        .with_id("UserMapper.insert")
        .with_parameters(["id", "phone"], json!({"id": id, "phone": phone}))
}

fn indexed_config(overwrite: bool, write_index: bool) -> EncryptionConfig {
    EncryptionConfig {
        enabled: true,
        overwrite_plain_by_index: overwrite,
        write_index_to_plain: write_index,
        tables: vec![
            TableConfig::new("users")
                .column(ColumnConfig::new("phone").with_target("phone_idx").indexed()),
        ],
        ..Default::default()
    }
}

#[test]
fn test_insert_then_select_phone() {
    let db = MemoryDb::new();
    let veil = interceptor(&users_config());

    let insert = insert_user(1, "13800000000");
    veil.execute(&insert, |s| db.run(s)).unwrap();

    let sent = db.executed();
    assert_eq!(sent[0].sql, insert.sql);
    assert_eq!(
        sent[0].bound_parameters(),
        vec![json!(1), json!("enc:00000000831")]
    );
    assert_eq!(db.stored("users"), vec![json!({"id": 1, "phone": "enc:00000000831"})]);
    // the caller's statement still holds the plaintext
    assert_eq!(insert.bound_parameters(), vec![json!(1), json!("13800000000")]);

    let select = BoundStatement::new(SqlCommand::Select, "SELECT phone FROM users WHERE id = ?")
        .with_parameters(["id"], json!(1));
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(rows, vec![json!({"phone": "13800000000"})]);
}

#[test]
fn test_update_round_trip() {
    let db = MemoryDb::new();
    let veil = interceptor(&users_config());
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();

    let update = BoundStatement::new(SqlCommand::Update, "UPDATE users SET phone = ? WHERE id = ?")
        .with_parameters(["phone", "id"], json!({"phone": "222", "id": 1}));
    veil.execute(&update, |s| db.run(s)).unwrap();
    assert_eq!(db.stored("users"), vec![json!({"id": 1, "phone": "enc:222"})]);

    let select = BoundStatement::new(SqlCommand::Select, "SELECT * FROM users");
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(rows, vec![json!({"id": 1, "phone": "222"})]);
}

#[test]
fn test_filter_on_encrypted_column() {
    let db = MemoryDb::new();
    let veil = interceptor(&users_config());
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();
    veil.execute(&insert_user(2, "222"), |s| db.run(s)).unwrap();

    let select = BoundStatement::new(SqlCommand::Select, "SELECT id, phone FROM users WHERE phone = ?")
        .with_parameters(["phone"], json!({"phone": "222"}));
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(rows, vec![json!({"id": 2, "phone": "222"})]);
}

#[test]
fn test_write_index_to_plain_fills_shadow_column() {
    let db = MemoryDb::new();
    let veil = interceptor(&indexed_config(false, true));
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();

    assert_eq!(
        db.executed()[0].sql,
        "INSERT INTO users (id, phone, phone_idx) VALUES (?, ?, ?)"
    );
    assert_eq!(
        db.stored("users"),
        vec![json!({"id": 1, "phone": "enc:111", "phone_idx": "idx:111"})]
    );

    let select = BoundStatement::new(SqlCommand::Select, "SELECT id, phone FROM users WHERE id = ?")
        .with_parameters(["id"], json!(1));
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(rows, vec![json!({"id": 1, "phone": "111"})]);
}

#[test]
fn test_overwrite_plain_by_index() {
    let db = MemoryDb::new();
    let veil = interceptor(&indexed_config(true, false));
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();
    veil.execute(&insert_user(2, "222"), |s| db.run(s)).unwrap();

    assert_eq!(
        db.stored("users"),
        vec![
            json!({"id": 1, "phone": "idx:111", "phone_idx": "enc:111"}),
            json!({"id": 2, "phone": "idx:222", "phone_idx": "enc:222"}),
        ]
    );

    // predicates compare against the index value; the ciphertext comes from the shadow column
    let select = BoundStatement::new(SqlCommand::Select, "SELECT * FROM users WHERE phone = ?")
        .with_parameters(["phone"], json!({"phone": "222"}));
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();
    assert_eq!(
        rows,
        vec![json!({"id": 2, "phone": "222", "phone_idx": "enc:222"})]
    );
}

#[test]
fn test_overwrite_update_adds_shadow_assignment() {
    let db = MemoryDb::new();
    let veil = interceptor(&indexed_config(true, false));
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();

    let update = BoundStatement::new(SqlCommand::Update, "UPDATE users SET phone = ? WHERE phone = ?")
        .with_parameters(["new", "old"], json!({"new": "999", "old": "111"}));
    veil.execute(&update, |s| db.run(s)).unwrap();

    assert_eq!(
        db.executed()[1].sql,
        "UPDATE users SET phone = ?, phone_idx = ? WHERE phone = ?"
    );
    assert_eq!(
        db.stored("users"),
        vec![json!({"id": 1, "phone": "idx:999", "phone_idx": "enc:999"})]
    );
}

#[test]
fn test_delete_by_encrypted_column() {
    let db = MemoryDb::new();
    let veil = interceptor(&users_config());
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();
    veil.execute(&insert_user(2, "222"), |s| db.run(s)).unwrap();

    let delete = BoundStatement::new(SqlCommand::Delete, "DELETE FROM users WHERE phone = ?")
        .with_parameters(["phone"], json!("111"));
    let prepared = veil.before_execution(&delete);
    assert!(prepared.context.plan().is_none());
    assert_eq!(prepared.statement.bound_parameters(), vec![json!("enc:111")]);

    db.run(&prepared.statement).unwrap();
    let rows = veil.after_execution(prepared.context, Vec::new());
    assert!(rows.is_empty());
    assert_eq!(db.stored("users"), vec![json!({"id": 2, "phone": "enc:222"})]);
}

#[test]
fn test_batch_insert_encrypts_every_row() {
    let db = MemoryDb::new();
    let veil = interceptor(&users_config());

    let insert = BoundStatement::new(
        SqlCommand::Insert,
        "INSERT INTO users (id, phone) VALUES (?, ?), (?, ?)",
    )
    .with_parameters(
        ["__frch_item_0.id", "__frch_item_0.phone", "__frch_item_1.id", "__frch_item_1.phone"],
        json!({}),
    )
    .with_additional_parameter("__frch_item_0", json!({"id": 1, "phone": "111"}))
    .with_additional_parameter("__frch_item_1", json!({"id": 2, "phone": "222"}));
    veil.execute(&insert, |s| db.run(s)).unwrap();

    assert_eq!(
        db.stored("users"),
        vec![
            json!({"id": 1, "phone": "enc:111"}),
            json!({"id": 2, "phone": "enc:222"}),
        ]
    );
}

#[test]
fn test_overwrite_select_of_source_column_reads_shadow() {
    let db = MemoryDb::new();
    let veil = interceptor(&indexed_config(true, false));
    veil.execute(&insert_user(1, "111"), |s| db.run(s)).unwrap();

    let select = BoundStatement::new(SqlCommand::Select, "SELECT phone FROM users WHERE id = ?")
        .with_parameters(["id"], json!(1));
    let rows = veil.execute(&select, |s| db.run(s)).unwrap();

    assert_eq!(
        db.executed()[1].sql,
        "SELECT phone, phone_idx FROM users WHERE id = ?"
    );
    assert_eq!(rows, vec![json!({"phone": "111"})]);
}

#[test]
fn test_upsert_assignment_is_encrypted() {
    let veil = interceptor(&users_config());
    let upsert = BoundStatement::new(
        SqlCommand::Insert,
        "INSERT INTO users (id, phone) VALUES (?, ?) ON DUPLICATE KEY UPDATE phone = ?",
    )
    .with_parameters(["id", "phone", "phone"], json!({"id": 1, "phone": "111"}));

    let prepared = veil.before_execution(&upsert);
    assert_eq!(prepared.statement.sql, upsert.sql);
    assert_eq!(
        prepared.statement.bound_parameters(),
        vec![json!(1), json!("enc:111"), json!("enc:111")]
    );
}

#[test]
fn test_upsert_gets_shadow_assignment() {
    let veil = interceptor(&indexed_config(false, true));
    let upsert = BoundStatement::new(
        SqlCommand::Insert,
        "INSERT INTO users (id, phone) VALUES (?, ?) ON DUPLICATE KEY UPDATE phone = ?",
    )
    .with_parameters(["id", "phone", "phone"], json!({"id": 1, "phone": "111"}));

    let prepared = veil.before_execution(&upsert);
    assert_eq!(
        prepared.statement.sql,
        "INSERT INTO users (id, phone, phone_idx) VALUES (?, ?, ?) \
         ON DUPLICATE KEY UPDATE phone = ?, phone_idx = ?"
    );
    assert_eq!(
        prepared.statement.bound_parameters(),
        vec![
            json!(1),
            json!("enc:111"),
            json!("idx:111"),
            json!("enc:111"),
            json!("idx:111"),
        ]
    );
}
