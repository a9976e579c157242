use fieldseal_crypto::{CorruptKeyPolicy, KeyProvider, looks_encrypted};
use fieldseal_db::{
    DatabaseManager, DbError, FieldsealConfig, NO_SENSITIVE_COLUMNS, Row, SelfTest,
    SensitivityRegistry, SqlValue,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn manager_with_activity() -> (tempfile::TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let manager = DatabaseManager::new(&FieldsealConfig::with_data_dir(dir.path()));
    manager
        .execute(
            "activity",
            "CREATE TABLE activity_log (id INTEGER PRIMARY KEY, kind TEXT, description TEXT, metadata TEXT)",
            vec![],
        )
        .await
        .unwrap();
    (dir, manager)
}

// ── Construction ─────────────────────────────────────────────────

#[tokio::test]
async fn self_test_passes_with_fresh_key() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DatabaseManager::new(&FieldsealConfig::with_data_dir(dir.path()));
    assert_eq!(manager.self_test(), &SelfTest::Passed);
    assert!(dir.path().join("encryption.key").exists());
    assert!(manager.open_databases().is_empty());
}

#[tokio::test]
async fn self_test_failure_does_not_prevent_construction() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("encryption.key");
    std::fs::write(&key_path, b"short").unwrap();

    let keys = Arc::new(KeyProvider::with_policy(&key_path, CorruptKeyPolicy::Refuse));
    let manager = DatabaseManager::with_parts(dir.path(), keys, SensitivityRegistry::builtin());
    assert!(!manager.self_test().is_passed());
    assert!(matches!(manager.self_test(), SelfTest::Failed(reason) if reason.contains("key")));

    // Plain statements still work; sealing writes do not.
    manager
        .execute("activity", "CREATE TABLE activity_log (id INTEGER PRIMARY KEY, description TEXT)", vec![])
        .await
        .unwrap();
    let err = manager
        .insert("activity", "activity_log", row(json!({"description": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Crypto(_)));
    assert_eq!(std::fs::read(&key_path).unwrap(), b"short");
}

#[tokio::test]
async fn stores_are_opened_lazily_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DatabaseManager::new(&FieldsealConfig::with_data_dir(dir.path()));

    let a = manager.store("Activity.db").unwrap();
    let b = manager.store("activity").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(manager.open_databases(), vec!["activity"]);
    assert_eq!(manager.database_path("ACTIVITY"), dir.path().join("activity.db"));
    assert!(dir.path().join("activity.db").exists());

    manager.store("emails").unwrap();
    assert_eq!(manager.open_databases(), vec!["activity", "emails"]);
}

#[tokio::test]
async fn empty_database_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DatabaseManager::new(&FieldsealConfig::with_data_dir(dir.path()));
    assert!(matches!(manager.store("  "), Err(DbError::InvalidInput(_))));
}

#[tokio::test]
async fn first_statement_opens_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DatabaseManager::new(&FieldsealConfig::with_data_dir(dir.path()));
    assert!(manager.open_databases().is_empty());

    manager
        .execute("Emails.db", "CREATE TABLE emails (id INTEGER PRIMARY KEY)", vec![])
        .await
        .unwrap();
    assert_eq!(manager.open_databases(), vec!["emails"]);
    assert!(dir.path().join("emails.db").exists());

    let err = manager.execute("", "SELECT 1", vec![]).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput(_)));
}

#[tokio::test]
async fn failed_open_is_reported_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let manager = DatabaseManager::new(&FieldsealConfig::with_data_dir(&blocker));

    let err = manager.execute("activity", "SELECT 1", vec![]).await.unwrap_err();
    assert!(matches!(err, DbError::Io(_)));
    assert!(manager.open_databases().is_empty());
}

// ── Registry-driven sealing ──────────────────────────────────────

#[tokio::test]
async fn insert_uses_registry_columns() {
    let (_dir, manager) = manager_with_activity().await;
    let outcome = manager
        .insert(
            "activity",
            "activity_log",
            row(json!({"kind": "ai", "description": "Email Generation", "metadata": "{\"subject\":\"Test\"}"})),
        )
        .await
        .unwrap();

    let raw = manager
        .store("activity")
        .unwrap()
        .fetch_one(
            "SELECT * FROM activity_log WHERE id = ?",
            &[SqlValue::Integer(outcome.inserted_id)],
            NO_SENSITIVE_COLUMNS,
        )
        .unwrap()
        .unwrap();
    assert_eq!(raw["kind"], json!("ai"));
    assert!(looks_encrypted(raw["description"].as_str().unwrap()));
    assert!(looks_encrypted(raw["metadata"].as_str().unwrap()));

    let fetched = manager
        .get(
            "activity",
            "SELECT * FROM activity_log WHERE id = ?",
            vec![SqlValue::Integer(outcome.inserted_id)],
            Some("activity_log"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched["description"], json!("Email Generation"));
    assert_eq!(fetched["metadata"], json!("{\"subject\":\"Test\"}"));
}

#[tokio::test]
async fn unregistered_tables_pass_through() {
    let (_dir, manager) = manager_with_activity().await;
    manager
        .execute("activity", "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", vec![])
        .await
        .unwrap();
    manager
        .insert("activity", "notes", row(json!({"body": "hello"})))
        .await
        .unwrap();

    let raw = manager
        .query("activity", "SELECT body FROM notes", vec![], Some("notes"))
        .await
        .unwrap();
    assert_eq!(raw, vec![row(json!({"body": "hello"}))]);
}

#[tokio::test]
async fn query_infers_table_from_sql() {
    let (_dir, manager) = manager_with_activity().await;
    manager
        .insert("activity", "activity_log", row(json!({"kind": "a", "description": "first"})))
        .await
        .unwrap();

    let rows = manager
        .query("activity", "select description from activity_log", vec![], None)
        .await
        .unwrap();
    assert_eq!(rows, vec![row(json!({"description": "first"}))]);
}

#[tokio::test]
async fn query_on_unregistered_name_returns_stored_values() {
    let (_dir, manager) = manager_with_activity().await;
    manager
        .insert("activity", "activity_log", row(json!({"kind": "a", "description": "first"})))
        .await
        .unwrap();
    manager
        .execute(
            "activity",
            "CREATE VIEW recent AS SELECT description FROM activity_log",
            vec![],
        )
        .await
        .unwrap();

    // The inferred table is the view, which has no sensitive columns.
    let rows = manager
        .query("activity", "SELECT description FROM recent", vec![], None)
        .await
        .unwrap();
    assert!(looks_encrypted(rows[0]["description"].as_str().unwrap()));

    let rows = manager
        .query("activity", "SELECT description FROM recent", vec![], Some("activity_log"))
        .await
        .unwrap();
    assert_eq!(rows[0]["description"], json!("first"));
}

#[tokio::test]
async fn update_seals_through_registry() {
    let (_dir, manager) = manager_with_activity().await;
    let id = manager
        .insert("activity", "activity_log", row(json!({"kind": "a", "description": "v1"})))
        .await
        .unwrap()
        .inserted_id;

    let outcome = manager
        .update(
            "activity",
            "activity_log",
            row(json!({"description": "v2"})),
            "id = ?",
            vec![SqlValue::Integer(id)],
        )
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);

    let fetched = manager
        .get("activity", "SELECT description FROM activity_log", vec![], None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched["description"], json!("v2"));
}

#[tokio::test]
async fn sql_errors_propagate_through_manager() {
    let (_dir, manager) = manager_with_activity().await;
    let err = manager
        .query("activity", "SELECT * FROM nowhere", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Sqlite(_)));
}

// ── Transactions ─────────────────────────────────────────────────

#[tokio::test]
async fn transaction_commits_and_rolls_back() {
    let (_dir, manager) = manager_with_activity().await;

    let count = manager
        .transaction("activity", |tx| {
            tx.insert("activity_log", &row(json!({"kind": "a", "description": "one"})))?;
            tx.insert("activity_log", &row(json!({"kind": "b", "description": "two"})))?;
            Ok(tx.query("SELECT * FROM activity_log", &[], None)?.len())
        })
        .await
        .unwrap();
    assert_eq!(count, 2);

    let err = manager
        .transaction("activity", |tx| {
            tx.insert("activity_log", &row(json!({"kind": "c", "description": "three"})))?;
            tx.execute("INSERT INTO nowhere VALUES (1)", &[])?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Sqlite(_)));

    let rows = manager
        .query("activity", "SELECT description FROM activity_log ORDER BY id", vec![], None)
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            row(json!({"description": "one"})),
            row(json!({"description": "two"})),
        ]
    );
}

// ── close_all ────────────────────────────────────────────────────

#[tokio::test]
async fn close_all_releases_every_store() {
    let (_dir, manager) = manager_with_activity().await;
    let activity = manager.store("activity").unwrap();
    let emails = manager.store("emails").unwrap();

    manager.close_all().await.unwrap();
    assert!(manager.open_databases().is_empty());
    assert!(!activity.is_open());
    assert!(!emails.is_open());

    // A later call reopens the file and sees committed data.
    let rows = manager
        .query("activity", "SELECT * FROM activity_log", vec![], None)
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(manager.open_databases(), vec!["activity"]);

    manager.close_all().await.unwrap();
    manager.close_all().await.unwrap();
}

#[tokio::test]
async fn concurrent_inserts_on_one_store() {
    let (_dir, manager) = manager_with_activity().await;
    let manager = Arc::new(manager);

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager
                .insert("activity", "activity_log", row(json!({"kind": "n", "description": format!("item {i}")})))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let rows = manager
        .query("activity", "SELECT description FROM activity_log", vec![], None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 16);
    assert!(rows.iter().all(|r| r["description"].as_str().unwrap().starts_with("item ")));
}
