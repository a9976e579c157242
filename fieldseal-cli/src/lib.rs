//! Commands behind the `fieldseal` binary.
//!
//! Each command takes a resolved [`FieldsealConfig`] and returns plain data;
//! `main` only parses arguments, sets up logging and prints.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fieldseal_bridge::{AnalysisBridge, AnalysisMethod, AnalysisOutcome};
use fieldseal_crypto::KeyStatus;
use fieldseal_db::{
    Backfill, BackfillPlan, BackfillReport, DatabaseManager, FieldsealConfig, Row, SelfTest,
    normalize_db_name,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fieldseal")]
#[command(about = "Maintain fieldseal encrypted databases")]
pub struct Cli {
    /// Configuration file (default: ~/.fieldseal/fieldseal.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create the key file if it does not exist yet
    InitKey,
    /// Show the key file location and state
    KeyStatus,
    /// Seal and open a probe value with the current key
    SelfTest,
    /// Seal plaintext left in registered columns
    Backfill {
        /// Count what would change without writing
        #[arg(long)]
        dry_run: bool,
        /// Only process these databases (default: every registered one)
        #[arg(short, long = "database")]
        databases: Vec<String>,
    },
    /// Run a query and print rows with sensitive columns opened
    Query {
        db: String,
        sql: String,
        /// Table whose registered columns should be opened
        #[arg(short, long)]
        table: Option<String>,
    },
    /// Call the analysis script and print its document
    Analyze {
        /// One of analyze_history, generate_recommendations,
        /// get_user_interests, get_category_stats
        method: String,
        #[arg(long)]
        script: PathBuf,
        #[arg(long, default_value = "python3")]
        interpreter: PathBuf,
    },
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    pub fn resolve_config(&self) -> FieldsealConfig {
        let mut config = match &self.config {
            Some(path) => FieldsealConfig::load_from(path),
            None => FieldsealConfig::load(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyReport {
    pub path: PathBuf,
    pub state: String,
}

fn describe(status: &KeyStatus) -> String {
    match status {
        KeyStatus::Missing => "missing".to_string(),
        KeyStatus::Valid => "valid".to_string(),
        KeyStatus::Corrupt { len } => format!("corrupt ({len} bytes)"),
        KeyStatus::Unreadable(reason) => format!("unreadable: {reason}"),
    }
}

pub fn key_status(config: &FieldsealConfig) -> KeyReport {
    let provider = config.key_provider();
    KeyReport {
        path: provider.path().to_path_buf(),
        state: describe(&provider.status()),
    }
}

pub fn init_key(config: &FieldsealConfig) -> Result<KeyReport> {
    let provider = config.key_provider();
    provider
        .get_key()
        .with_context(|| format!("Failed to obtain key at {}", provider.path().display()))?;
    let status = provider.status();
    if status != KeyStatus::Valid {
        bail!(
            "Key at {} could not be persisted ({})",
            provider.path().display(),
            describe(&status)
        );
    }
    Ok(key_status(config))
}

pub fn self_test(config: &FieldsealConfig) -> Result<()> {
    match SelfTest::run(&config.key_provider()) {
        SelfTest::Passed => Ok(()),
        SelfTest::Failed(reason) => bail!("Self-test failed: {reason}"),
    }
}

pub fn backfill(config: &FieldsealConfig, dry_run: bool, databases: &[String]) -> Result<BackfillReport> {
    let registry = config.registry();
    let wanted: Vec<String> = databases.iter().map(|d| normalize_db_name(d)).collect();
    for name in &wanted {
        if registry.tables(name).next().is_none() {
            bail!("Database {name} has no registered tables");
        }
    }

    let mut plan = BackfillPlan::new();
    for (db, table, columns) in registry.entries() {
        if wanted.is_empty() || wanted.iter().any(|w| w == db) {
            plan = plan.add(db, table, columns);
        }
    }

    let keys = Arc::new(config.key_provider());
    let report = Backfill::new(&config.data_dir, keys)
        .dry_run(dry_run)
        .run(&plan)
        .context("Backfill failed")?;
    info!(
        rows_updated = report.rows_updated(),
        rows_failed = report.rows_failed(),
        dry_run,
        "Backfill complete"
    );
    Ok(report)
}

pub async fn query(
    config: &FieldsealConfig,
    db: &str,
    sql: &str,
    table: Option<&str>,
) -> Result<Vec<Row>> {
    let manager = DatabaseManager::new(config);
    let rows = manager
        .query(db, sql, Vec::new(), table)
        .await
        .with_context(|| format!("Query on {db} failed"));
    manager.close_all().await.context("Failed to close databases")?;
    rows
}

pub async fn analyze(
    interpreter: PathBuf,
    script: PathBuf,
    method: &str,
) -> Result<AnalysisOutcome<serde_json::Value>> {
    let Some(method) = AnalysisMethod::ALL.into_iter().find(|m| m.as_str() == method) else {
        bail!("Unknown analysis method {method}");
    };
    let bridge = AnalysisBridge::new(interpreter, script);
    let outcome = match method {
        AnalysisMethod::AnalyzeHistory => to_json(bridge.analyze_history().await)?,
        AnalysisMethod::GenerateRecommendations => to_json(bridge.generate_recommendations().await)?,
        AnalysisMethod::UserInterests => to_json(bridge.user_interests().await)?,
        AnalysisMethod::CategoryStats => to_json(bridge.category_stats().await)?,
    };
    Ok(outcome)
}

fn to_json<T: Serialize>(outcome: AnalysisOutcome<T>) -> Result<AnalysisOutcome<serde_json::Value>> {
    Ok(match outcome {
        AnalysisOutcome::Ready(value) => AnalysisOutcome::Ready(serde_json::to_value(value)?),
        AnalysisOutcome::Unavailable { reason, fallback } => AnalysisOutcome::Unavailable {
            reason,
            fallback: serde_json::to_value(fallback)?,
        },
    })
}
