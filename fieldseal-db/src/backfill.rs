//! Offline backfill: seal sensitive values that are still plaintext.
//!
//! Each target database file is copied to `<file>.backup-<timestamp>` before
//! anything is written, and the copy is kept. Values that already look like
//! envelopes are left alone, so running the backfill again changes nothing.
//! Rows are updated one at a time; a row that fails is logged and skipped.
//! Rows whose identifier is NULL or shared with another row cannot be
//! addressed on their own and are counted as failed without being touched.

use crate::error::{DbError, DbResult};
use crate::registry::{SensitivityRegistry, normalize_db_name};
use crate::sql::quote_ident;
use crate::value::SqlValue;
use fieldseal_crypto::{FieldCipher, KeyProvider, looks_encrypted};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifier column used to address rows unless overridden.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// One table to backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillTarget {
    pub database: String,
    pub table: String,
    pub columns: Vec<String>,
    pub id_column: String,
}

/// The fixed list of `(database, table, columns)` to process.
#[derive(Debug, Clone, Default)]
pub struct BackfillPlan {
    targets: Vec<BackfillTarget>,
}

impl BackfillPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// One target per registry entry, keyed by `id`.
    pub fn from_registry(registry: &SensitivityRegistry) -> Self {
        registry
            .entries()
            .fold(Self::new(), |plan, (db, table, columns)| {
                plan.add(db, table, columns)
            })
    }

    pub fn add<S: AsRef<str>>(mut self, database: &str, table: &str, columns: &[S]) -> Self {
        self.targets.push(BackfillTarget {
            database: normalize_db_name(database),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
        });
        self
    }

    /// Addresses rows of `database.table` by `id_column` instead of `id`.
    pub fn with_id_column(mut self, database: &str, table: &str, id_column: &str) -> Self {
        let database = normalize_db_name(database);
        for target in &mut self.targets {
            if target.database == database && target.table == table {
                target.id_column = id_column.to_string();
            }
        }
        self
    }

    pub fn targets(&self) -> &[BackfillTarget] {
        &self.targets
    }

    fn by_database(&self) -> BTreeMap<&str, Vec<&BackfillTarget>> {
        let mut grouped: BTreeMap<&str, Vec<&BackfillTarget>> = BTreeMap::new();
        for target in &self.targets {
            grouped.entry(&target.database).or_default().push(target);
        }
        grouped
    }
}

/// Counts for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    /// The table (or its identifier column) does not exist.
    pub skipped: bool,
    pub rows_scanned: usize,
    /// Rows written (or, in a dry run, rows that would be written).
    pub rows_updated: usize,
    pub values_sealed: usize,
    pub rows_failed: usize,
}

/// Counts for one database file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseReport {
    pub database: String,
    pub path: PathBuf,
    /// The database file does not exist.
    pub missing: bool,
    pub backup: Option<PathBuf>,
    pub tables: Vec<TableReport>,
}

impl DatabaseReport {
    pub fn rows_updated(&self) -> usize {
        self.tables.iter().map(|t| t.rows_updated).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub databases: Vec<DatabaseReport>,
}

impl BackfillReport {
    pub fn rows_updated(&self) -> usize {
        self.databases.iter().map(DatabaseReport::rows_updated).sum()
    }

    pub fn rows_failed(&self) -> usize {
        self.databases
            .iter()
            .flat_map(|d| &d.tables)
            .map(|t| t.rows_failed)
            .sum()
    }
}

/// Runs a [`BackfillPlan`] against the `<name>.db` files in a data directory.
pub struct Backfill {
    data_dir: PathBuf,
    keys: Arc<KeyProvider>,
    dry_run: bool,
}

impl Backfill {
    pub fn new(data_dir: impl Into<PathBuf>, keys: Arc<KeyProvider>) -> Self {
        Self {
            data_dir: data_dir.into(),
            keys,
            dry_run: false,
        }
    }

    /// Count what would change without copying or writing anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Processes every database in the plan.
    ///
    /// Fails only when the key is unavailable or a database cannot be
    /// opened or backed up; per-row failures are counted in the report.
    pub fn run(&self, plan: &BackfillPlan) -> DbResult<BackfillReport> {
        let cipher = FieldCipher::from_provider(&self.keys)?;
        let mut report = BackfillReport {
            dry_run: self.dry_run,
            databases: Vec::new(),
        };

        for (database, targets) in plan.by_database() {
            let db_report = self.run_database(&cipher, database, &targets)?;
            info!(
                db = %database,
                rows_updated = db_report.rows_updated(),
                dry_run = self.dry_run,
                "Backfill finished for database"
            );
            report.databases.push(db_report);
        }

        Ok(report)
    }

    fn run_database(
        &self,
        cipher: &FieldCipher,
        database: &str,
        targets: &[&BackfillTarget],
    ) -> DbResult<DatabaseReport> {
        let path = self.data_dir.join(format!("{database}.db"));
        let mut report = DatabaseReport {
            database: database.to_string(),
            path: path.clone(),
            ..DatabaseReport::default()
        };

        if !path.exists() {
            warn!(db = %database, path = %path.display(), "Database file not found, skipping");
            report.missing = true;
            return Ok(report);
        }

        if !self.dry_run {
            report.backup = Some(backup_file(&path)?);
        }

        let conn = Connection::open(&path)?;
        for target in targets {
            report.tables.push(self.run_table(&conn, cipher, target)?);
        }
        conn.close().map_err(|(_, e)| e)?;

        Ok(report)
    }

    fn run_table(
        &self,
        conn: &Connection,
        cipher: &FieldCipher,
        target: &BackfillTarget,
    ) -> DbResult<TableReport> {
        let mut report = TableReport {
            table: target.table.clone(),
            ..TableReport::default()
        };

        if !table_exists(conn, &target.table)? {
            warn!(db = %target.database, table = %target.table, "Table not found, skipping");
            report.skipped = true;
            return Ok(report);
        }

        let existing = table_columns(conn, &target.table)?;
        if !existing.contains(&target.id_column) {
            warn!(
                db = %target.database,
                table = %target.table,
                id_column = %target.id_column,
                "Identifier column not found, skipping"
            );
            report.skipped = true;
            return Ok(report);
        }

        let columns: Vec<&String> = target
            .columns
            .iter()
            .filter(|c| existing.contains(c) && **c != target.id_column)
            .collect();
        if columns.is_empty() {
            debug!(table = %target.table, "No configured columns present");
            return Ok(report);
        }

        let table_sql = quote_ident(&target.table)?;
        let id_sql = quote_ident(&target.id_column)?;
        let mut select_cols = vec![id_sql.clone()];
        for column in &columns {
            select_cols.push(quote_ident(column)?);
        }
        let select = format!("SELECT {} FROM {table_sql}", select_cols.join(", "));

        let rows: Vec<Vec<SqlValue>> = {
            let mut stmt = conn.prepare(&select)?;
            let width = select_cols.len();
            stmt.query_map([], |r| {
                (0..width).map(|i| r.get::<_, SqlValue>(i)).collect()
            })?
            .collect::<Result<_, _>>()?
        };

        let shared_ids = duplicate_ids(conn, &table_sql, &id_sql)?;

        for row in rows {
            report.rows_scanned += 1;
            let id = &row[0];
            let mut staged: Vec<(&str, String)> = Vec::new();
            let mut failed = false;

            for (column, value) in columns.iter().zip(&row[1..]) {
                let plaintext = match value {
                    SqlValue::Null => continue,
                    SqlValue::Text(s) if looks_encrypted(s) => continue,
                    SqlValue::Text(s) => s.clone(),
                    SqlValue::Integer(i) => i.to_string(),
                    SqlValue::Real(f) => f.to_string(),
                    SqlValue::Blob(_) => {
                        warn!(table = %target.table, column = %column, "Blob value cannot be sealed, leaving it");
                        continue;
                    }
                };
                match cipher.try_seal(&plaintext) {
                    Ok(envelope) => staged.push((column.as_str(), envelope.to_string())),
                    Err(e) => {
                        warn!(table = %target.table, column = %column, id = ?id, error = %e, "Failed to seal value");
                        failed = true;
                    }
                }
            }

            if failed {
                report.rows_failed += 1;
                continue;
            }
            if staged.is_empty() {
                continue;
            }
            if *id == SqlValue::Null || shared_ids.contains(id) {
                warn!(
                    table = %target.table,
                    id_column = %target.id_column,
                    id = ?id,
                    "Row identifier is NULL or not unique, leaving row"
                );
                report.rows_failed += 1;
                continue;
            }

            if self.dry_run {
                report.rows_updated += 1;
                report.values_sealed += staged.len();
                continue;
            }

            match apply_update(conn, &table_sql, &id_sql, id, &staged) {
                Ok(()) => {
                    report.rows_updated += 1;
                    report.values_sealed += staged.len();
                }
                Err(e) => {
                    warn!(table = %target.table, id = ?id, error = %e, "Failed to update row, continuing");
                    report.rows_failed += 1;
                }
            }
        }

        info!(
            db = %target.database,
            table = %target.table,
            scanned = report.rows_scanned,
            updated = report.rows_updated,
            failed = report.rows_failed,
            "Backfilled table"
        );
        Ok(report)
    }
}

fn apply_update(
    conn: &Connection,
    table_sql: &str,
    id_sql: &str,
    id: &SqlValue,
    staged: &[(&str, String)],
) -> DbResult<()> {
    let mut assignments = Vec::with_capacity(staged.len());
    let mut values: Vec<SqlValue> = Vec::with_capacity(staged.len() + 1);
    for (column, sealed) in staged {
        assignments.push(format!("{} = ?", quote_ident(column)?));
        values.push(SqlValue::Text(sealed.clone()));
    }
    values.push(id.clone());
    let sql = format!(
        "UPDATE {table_sql} SET {} WHERE {id_sql} = ?",
        assignments.join(", ")
    );

    // Dropping the transaction without committing rolls the update back.
    let tx = conn.unchecked_transaction()?;
    let affected = tx.execute(&sql, params_from_iter(values.iter()))?;
    if affected != 1 {
        return Err(DbError::RowCount(affected));
    }
    tx.commit()?;
    Ok(())
}

/// Identifier values carried by more than one row.
fn duplicate_ids(conn: &Connection, table_sql: &str, id_sql: &str) -> DbResult<Vec<SqlValue>> {
    let sql = format!(
        "SELECT {id_sql} FROM {table_sql} WHERE {id_sql} IS NOT NULL GROUP BY {id_sql} HAVING COUNT(*) > 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, SqlValue>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let names = stmt
        .query_map([table], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Copies `path` to `<path>.backup-<UTC timestamp>` and returns the copy's path.
pub fn backup_file(path: &Path) -> DbResult<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".backup-{stamp}"));
    let backup = PathBuf::from(name);
    std::fs::copy(path, &backup)?;
    info!(from = %path.display(), to = %backup.display(), "Backed up database");
    Ok(backup)
}
