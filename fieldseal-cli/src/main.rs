//! fieldseal maintenance tool
//!
//! Usage:
//!   fieldseal init-key
//!   fieldseal backfill --dry-run
//!   fieldseal query activity "SELECT * FROM activity_log" --table activity_log

use anyhow::Result;
use clap::Parser;
use fieldseal_bridge::AnalysisOutcome;
use fieldseal_cli::{Cli, Command};
use tracing::{Level, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .from_env_lossy();
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = cli.resolve_config();

    match cli.command {
        Command::InitKey => {
            let report = fieldseal_cli::init_key(&config)?;
            println!("{}: {}", report.path.display(), report.state);
        }
        Command::KeyStatus => {
            let report = fieldseal_cli::key_status(&config);
            println!("{}: {}", report.path.display(), report.state);
        }
        Command::SelfTest => {
            fieldseal_cli::self_test(&config)?;
            println!("Self-test passed");
        }
        Command::Backfill { dry_run, databases } => {
            let report = fieldseal_cli::backfill(&config, dry_run, &databases)?;
            for db in &report.databases {
                if db.missing {
                    println!("{}: not found", db.database);
                    continue;
                }
                for table in &db.tables {
                    if table.skipped {
                        println!("{}.{}: skipped", db.database, table.table);
                    } else {
                        println!(
                            "{}.{}: {} scanned, {} updated, {} failed",
                            db.database, table.table, table.rows_scanned, table.rows_updated, table.rows_failed
                        );
                    }
                }
                if let Some(backup) = &db.backup {
                    println!("{}: backup at {}", db.database, backup.display());
                }
            }
            let verb = if report.dry_run { "would update" } else { "updated" };
            println!("Total: {verb} {} rows", report.rows_updated());
        }
        Command::Query { db, sql, table } => {
            let rows = fieldseal_cli::query(&config, &db, &sql, table.as_deref()).await?;
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        Command::Analyze {
            method,
            script,
            interpreter,
        } => {
            let outcome = fieldseal_cli::analyze(interpreter, script, &method).await?;
            if let AnalysisOutcome::Unavailable { reason, .. } = &outcome {
                warn!("Analysis unavailable: {}", reason);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.into_value())?);
        }
    }

    Ok(())
}
