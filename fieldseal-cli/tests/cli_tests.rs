use clap::Parser;
use fieldseal_cli::{Cli, Command};
use fieldseal_db::FieldsealConfig;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;

fn config(dir: &std::path::Path) -> FieldsealConfig {
    FieldsealConfig::with_data_dir(dir)
}

// ── Argument parsing ─────────────────────────────────────────────

#[test]
fn parses_backfill_flags() {
    let cli = Cli::try_parse_from([
        "fieldseal",
        "backfill",
        "--dry-run",
        "-d",
        "activity",
        "--database",
        "Emails.db",
    ])
    .unwrap();
    assert_eq!(
        cli.command,
        Command::Backfill {
            dry_run: true,
            databases: vec!["activity".into(), "Emails.db".into()],
        }
    );
}

#[test]
fn parses_query_with_global_options() {
    let cli = Cli::try_parse_from([
        "fieldseal",
        "query",
        "activity",
        "SELECT * FROM activity_log",
        "--table",
        "activity_log",
        "--data-dir",
        "/tmp/fs",
        "-v",
    ])
    .unwrap();
    assert!(cli.verbose);
    assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/fs")));
    assert_eq!(
        cli.command,
        Command::Query {
            db: "activity".into(),
            sql: "SELECT * FROM activity_log".into(),
            table: Some("activity_log".into()),
        }
    );
}

#[test]
fn data_dir_overrides_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("fieldseal.toml");
    std::fs::write(&config_path, "data_dir = \"/from/file\"\ncorrupt_key = \"refuse\"\n").unwrap();

    let cli = Cli::try_parse_from([
        "fieldseal",
        "key-status",
        "--config",
        config_path.to_str().unwrap(),
        "--data-dir",
        "/from/flag",
    ])
    .unwrap();
    let config = cli.resolve_config();
    assert_eq!(config.data_dir, PathBuf::from("/from/flag"));
    assert_eq!(config.key_path(), PathBuf::from("/from/flag/encryption.key"));
}

#[test]
fn rejects_unknown_subcommand() {
    assert!(Cli::try_parse_from(["fieldseal", "decrypt-everything"]).is_err());
}

// ── Key commands ─────────────────────────────────────────────────

#[test]
fn init_key_then_status() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    assert_eq!(fieldseal_cli::key_status(&config).state, "missing");
    let report = fieldseal_cli::init_key(&config).unwrap();
    assert_eq!(report.state, "valid");
    assert_eq!(report.path, dir.path().join("encryption.key"));
    fieldseal_cli::self_test(&config).unwrap();
}

#[test]
fn status_reports_corrupt_key() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("encryption.key"), [0u8; 7]).unwrap();
    assert_eq!(
        fieldseal_cli::key_status(&config(dir.path())).state,
        "corrupt (7 bytes)"
    );
}

// ── Backfill and query ───────────────────────────────────────────

#[tokio::test]
async fn backfill_then_query_opens_values() {
    let dir = tempfile::tempdir().unwrap();
    {
        let conn = rusqlite::Connection::open(dir.path().join("activity.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE activity_log (id INTEGER PRIMARY KEY, description TEXT, metadata TEXT);
             INSERT INTO activity_log (description, metadata) VALUES ('Email Generation', '{}');",
        )
        .unwrap();
    }
    let config = config(dir.path());

    let dry = fieldseal_cli::backfill(&config, true, &["activity".to_string()]).unwrap();
    assert_eq!(dry.rows_updated(), 1);

    let report = fieldseal_cli::backfill(&config, false, &[]).unwrap();
    assert_eq!(report.rows_updated(), 1);
    // Every registered database is in the report, present or not.
    assert_eq!(report.databases.len(), 4);

    let rows = fieldseal_cli::query(&config, "activity", "SELECT description FROM activity_log", None)
        .await
        .unwrap();
    assert_eq!(rows[0]["description"], json!("Email Generation"));
}

#[test]
fn backfill_rejects_unregistered_database() {
    let dir = tempfile::tempdir().unwrap();
    let err = fieldseal_cli::backfill(&config(dir.path()), true, &["notes".to_string()]).unwrap_err();
    assert!(err.to_string().contains("notes"));
}

#[tokio::test]
async fn analyze_rejects_unknown_method() {
    let err = fieldseal_cli::analyze("python3".into(), "missing.py".into(), "drop_tables")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("drop_tables"));
}

#[tokio::test]
async fn analyze_falls_back_when_script_cannot_run() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = fieldseal_cli::analyze(
        dir.path().join("no-interpreter"),
        dir.path().join("engine.py"),
        "get_category_stats",
    )
    .await
    .unwrap();
    assert!(!outcome.is_ready());
    assert_eq!(outcome.into_value(), json!([]));
}
