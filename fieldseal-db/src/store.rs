//! Per-file SQLite store with transparent column encryption.
//!
//! The store is the only place that translates between on-disk rows and
//! application-visible rows. Columns named in a call's `sensitive` list are
//! sealed before they are written and opened after they are read; every
//! other column passes through untouched.
//!
//! Reads never fail because of encryption: a sensitive value that does not
//! look like an envelope is returned as legacy plaintext, and an envelope
//! that cannot be opened is returned exactly as stored. Statement errors
//! from SQLite are returned to the caller unchanged.

use crate::error::{DbError, DbResult};
use crate::sql::quote_ident;
use crate::value::{Row, SqlValue, json_from_sql, sql_from_json};
use fieldseal_crypto::{FieldCipher, KeyProvider, looks_encrypted};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Sensitive-column list for calls that touch no sensitive data.
pub const NO_SENSITIVE_COLUMNS: &[&str] = &[];

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// `last_insert_rowid()` after the statement.
    pub inserted_id: i64,
    /// Rows changed by the statement.
    pub affected: usize,
}

/// One SQLite database file plus the key used for its sensitive columns.
pub struct EncryptedStore {
    name: String,
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
    keys: Arc<KeyProvider>,
}

impl EncryptedStore {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(name: &str, path: &Path, keys: Arc<KeyProvider>) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!(db = %name, path = %path.display(), "Opened database");
        Ok(Self {
            name: name.to_string(),
            path: Some(path.to_path_buf()),
            conn: Mutex::new(Some(conn)),
            keys,
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(name: &str, keys: Arc<KeyProvider>) -> DbResult<Self> {
        Ok(Self {
            name: name.to_string(),
            path: None,
            conn: Mutex::new(Some(Connection::open_in_memory()?)),
            keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic inside a transaction leaves rusqlite to roll back on drop,
        // so the connection itself is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the open connection outside any transaction.
    pub fn session<T>(&self, f: impl FnOnce(&StoreSession<'_>) -> DbResult<T>) -> DbResult<T> {
        let guard = self.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| DbError::Closed(self.name.clone()))?;
        f(&StoreSession {
            conn,
            keys: &self.keys,
        })
    }

    /// Runs a statement as-is and reports the inserted row id and row count.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        self.session(|s| s.execute(sql, params))
    }

    /// Runs several `;`-separated statements without parameters (DDL).
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.session(|s| s.execute_batch(sql))
    }

    /// Runs a query and returns the first row, opening sensitive columns.
    pub fn fetch_one<S: AsRef<str>>(
        &self,
        sql: &str,
        params: &[SqlValue],
        sensitive: &[S],
    ) -> DbResult<Option<Row>> {
        self.session(|s| s.fetch_one(sql, params, sensitive))
    }

    /// Runs a query and returns every row, opening sensitive columns.
    pub fn fetch_many<S: AsRef<str>>(
        &self,
        sql: &str,
        params: &[SqlValue],
        sensitive: &[S],
    ) -> DbResult<Vec<Row>> {
        self.session(|s| s.fetch_many(sql, params, sensitive))
    }

    /// Inserts `row` into `table`, sealing sensitive columns first.
    pub fn insert_with_encryption<S: AsRef<str>>(
        &self,
        table: &str,
        row: &Row,
        sensitive: &[S],
    ) -> DbResult<ExecOutcome> {
        self.session(|s| s.insert_with_encryption(table, row, sensitive))
    }

    /// Updates `table` with the columns in `row`, sealing sensitive ones.
    ///
    /// `where_clause` uses `?` placeholders bound to `where_params`, which are
    /// never encrypted: rows cannot be matched on a sealed column's plaintext.
    pub fn update_with_encryption<S: AsRef<str>>(
        &self,
        table: &str,
        row: &Row,
        where_clause: &str,
        where_params: &[SqlValue],
        sensitive: &[S],
    ) -> DbResult<ExecOutcome> {
        self.session(|s| {
            s.update_with_encryption(table, row, where_clause, where_params, sensitive)
        })
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`. Rolls back and returns the error when
    /// `f` returns `Err`; a panic in `f` also rolls back as the transaction
    /// is dropped. Transactions on one store must not be interleaved.
    pub fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&StoreSession<'_>) -> DbResult<T>,
    {
        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| DbError::Closed(self.name.clone()))?;

        let tx = conn.transaction()?;
        debug!(db = %self.name, "Transaction started");
        let result = {
            let session = StoreSession {
                conn: &tx,
                keys: &self.keys,
            };
            f(&session)
        };

        match result {
            Ok(value) => {
                tx.commit()?;
                debug!(db = %self.name, "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(db = %self.name, error = %rollback_err, "Rollback failed");
                } else {
                    debug!(db = %self.name, error = %e, "Transaction rolled back");
                }
                Err(e)
            }
        }
    }

    pub fn table_exists(&self, table: &str) -> DbResult<bool> {
        self.session(|s| s.table_exists(table))
    }

    /// Column names of `table`, in declaration order.
    pub fn columns(&self, table: &str) -> DbResult<Vec<String>> {
        self.session(|s| s.columns(table))
    }

    /// Closes the connection. Later calls return [`DbError::Closed`].
    pub fn close(&self) -> DbResult<()> {
        let conn = self.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| DbError::Sqlite(e))?;
            info!(db = %self.name, "Closed database");
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Statement runner bound to one connection, used directly by
/// [`EncryptedStore`] and handed to transaction closures.
pub struct StoreSession<'a> {
    conn: &'a Connection,
    keys: &'a KeyProvider,
}

impl StoreSession<'_> {
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        let affected = self.conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(ExecOutcome {
            inserted_id: self.conn.last_insert_rowid(),
            affected,
        })
    }

    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn fetch_one<S: AsRef<str>>(
        &self,
        sql: &str,
        params: &[SqlValue],
        sensitive: &[S],
    ) -> DbResult<Option<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names = column_names(&stmt);
        let row = stmt
            .query_row(params_from_iter(params.iter()), |r| read_row(r, &names))
            .optional()?;
        Ok(row.map(|mut row| {
            self.reveal(std::slice::from_mut(&mut row), sensitive);
            row
        }))
    }

    pub fn fetch_many<S: AsRef<str>>(
        &self,
        sql: &str,
        params: &[SqlValue],
        sensitive: &[S],
    ) -> DbResult<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names = column_names(&stmt);
        let mut rows = stmt
            .query_map(params_from_iter(params.iter()), |r| read_row(r, &names))?
            .collect::<Result<Vec<_>, _>>()?;
        self.reveal(&mut rows, sensitive);
        Ok(rows)
    }

    pub fn insert_with_encryption<S: AsRef<str>>(
        &self,
        table: &str,
        row: &Row,
        sensitive: &[S],
    ) -> DbResult<ExecOutcome> {
        let table_sql = quote_ident(table)?;
        let cells = self.conceal(row, sensitive)?;

        if cells.is_empty() {
            return self.execute(&format!("INSERT INTO {table_sql} DEFAULT VALUES"), &[]);
        }

        let mut columns = Vec::with_capacity(cells.len());
        let mut values = Vec::with_capacity(cells.len());
        for (column, value) in cells {
            columns.push(quote_ident(&column)?);
            values.push(value);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table_sql} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        self.execute(&sql, &values)
    }

    pub fn update_with_encryption<S: AsRef<str>>(
        &self,
        table: &str,
        row: &Row,
        where_clause: &str,
        where_params: &[SqlValue],
        sensitive: &[S],
    ) -> DbResult<ExecOutcome> {
        let table_sql = quote_ident(table)?;
        let cells = self.conceal(row, sensitive)?;
        if cells.is_empty() {
            return Err(DbError::InvalidInput(format!(
                "update of {table} has no columns to set"
            )));
        }

        let mut assignments = Vec::with_capacity(cells.len());
        let mut values = Vec::with_capacity(cells.len() + where_params.len());
        for (column, value) in cells {
            assignments.push(format!("{} = ?", quote_ident(&column)?));
            values.push(value);
        }
        values.extend(where_params.iter().cloned());

        let sql = format!(
            "UPDATE {table_sql} SET {} WHERE {where_clause}",
            assignments.join(", ")
        );
        self.execute(&sql, &values)
    }

    pub fn table_exists(&self, table: &str) -> DbResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn columns(&self, table: &str) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([table], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Opens sensitive columns in place. Never fails: cells that are not
    /// envelopes, or that cannot be opened, keep their stored value.
    fn reveal<S: AsRef<str>>(&self, rows: &mut [Row], sensitive: &[S]) {
        if sensitive.is_empty() || rows.is_empty() {
            return;
        }

        let cipher = match FieldCipher::from_provider(self.keys) {
            Ok(cipher) => cipher,
            Err(e) => {
                warn!(error = %e, "No key available, returning sensitive columns as stored");
                return;
            }
        };

        for row in rows.iter_mut() {
            for column in sensitive {
                let column = column.as_ref();
                let Some(Value::String(stored)) = row.get_mut(column) else {
                    continue;
                };
                if !looks_encrypted(stored) {
                    continue;
                }
                match cipher.try_open(stored) {
                    Ok(plaintext) => *stored = plaintext,
                    Err(e) => {
                        warn!(column, error = %e, "Could not open envelope, keeping stored value");
                    }
                }
            }
        }
    }

    /// Converts `row` into bindable cells, sealing sensitive columns.
    ///
    /// Structured values are sealed as JSON, scalars as their text form. A
    /// value that fails to seal is written as NULL.
    fn conceal<S: AsRef<str>>(&self, row: &Row, sensitive: &[S]) -> DbResult<Vec<(String, SqlValue)>> {
        let is_sensitive = |column: &str| sensitive.iter().any(|s| s.as_ref() == column);
        let needs_cipher = row
            .iter()
            .any(|(column, value)| !value.is_null() && is_sensitive(column));
        let cipher = if needs_cipher {
            Some(FieldCipher::from_provider(self.keys)?)
        } else {
            None
        };

        let mut cells = Vec::with_capacity(row.len());
        for (column, value) in row {
            let cell = match (&cipher, value) {
                (Some(cipher), value) if !value.is_null() && is_sensitive(column) => {
                    let sealed = match value {
                        Value::Array(_) | Value::Object(_) => cipher.seal_object(value),
                        Value::String(s) => cipher.seal(s),
                        other => cipher.seal(&other.to_string()),
                    };
                    if sealed.is_none() {
                        warn!(column = %column, "Sealing failed, column will be stored as NULL");
                    }
                    sealed.map_or(SqlValue::Null, SqlValue::Text)
                }
                _ => sql_from_json(value),
            };
            cells.push((column.clone(), cell));
        }
        Ok(cells)
    }
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn read_row(r: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Row> {
    let mut row = Row::new();
    for (i, name) in names.iter().enumerate() {
        row.insert(name.clone(), json_from_sql(r.get_ref(i)?));
    }
    Ok(row)
}
