//! One entry point for every database.
//!
//! The [`DatabaseManager`] owns the key provider, the sensitivity registry
//! and one [`EncryptedStore`] per database file. Stores are opened on first
//! use and kept for the life of the manager. Each call resolves the table's
//! sensitive columns from the registry and runs the statement on the
//! blocking pool, opening the store there if needed, so async callers never
//! wait on SQLite or the file system directly.

use crate::config::FieldsealConfig;
use crate::error::{DbError, DbResult};
use crate::registry::{SensitivityRegistry, normalize_db_name};
use crate::sql::extract_table_name;
use crate::store::{EncryptedStore, ExecOutcome, StoreSession};
use crate::value::{Row, SqlValue};
use fieldseal_crypto::{FieldCipher, KeyProvider};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of the seal/open probe run when the manager is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfTest {
    Passed,
    Failed(String),
}

impl SelfTest {
    pub fn is_passed(&self) -> bool {
        matches!(self, SelfTest::Passed)
    }

    /// Seals a random probe with the current key and opens it again.
    pub fn run(keys: &KeyProvider) -> Self {
        let probe = format!("fieldseal-probe-{}", uuid::Uuid::new_v4());
        let cipher = match FieldCipher::from_provider(keys) {
            Ok(cipher) => cipher,
            Err(e) => return SelfTest::Failed(format!("key unavailable: {e}")),
        };
        let envelope = match cipher.try_seal(&probe) {
            Ok(envelope) => envelope.to_string(),
            Err(e) => return SelfTest::Failed(format!("seal failed: {e}")),
        };
        match cipher.try_open(&envelope) {
            Ok(opened) if opened == probe => SelfTest::Passed,
            Ok(_) => SelfTest::Failed("probe did not round-trip".to_string()),
            Err(e) => SelfTest::Failed(format!("open failed: {e}")),
        }
    }
}

/// Registry-aware handle to a store, used by both the manager and
/// transaction closures.
pub struct ManagedTransaction<'a> {
    db: &'a str,
    session: &'a StoreSession<'a>,
    registry: &'a SensitivityRegistry,
}

impl ManagedTransaction<'_> {
    pub fn insert(&self, table: &str, row: &Row) -> DbResult<ExecOutcome> {
        let sensitive = self.registry.sensitive_columns(self.db, table);
        self.session.insert_with_encryption(table, row, sensitive)
    }

    pub fn update(
        &self,
        table: &str,
        row: &Row,
        where_clause: &str,
        where_params: &[SqlValue],
    ) -> DbResult<ExecOutcome> {
        let sensitive = self.registry.sensitive_columns(self.db, table);
        self.session
            .update_with_encryption(table, row, where_clause, where_params, sensitive)
    }

    pub fn query(&self, sql: &str, params: &[SqlValue], table: Option<&str>) -> DbResult<Vec<Row>> {
        let sensitive = resolve_sensitive(self.registry, self.db, sql, table);
        self.session.fetch_many(sql, params, sensitive.as_slice())
    }

    pub fn get(&self, sql: &str, params: &[SqlValue], table: Option<&str>) -> DbResult<Option<Row>> {
        let sensitive = resolve_sensitive(self.registry, self.db, sql, table);
        self.session.fetch_one(sql, params, sensitive.as_slice())
    }

    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        self.session.execute(sql, params)
    }
}

/// Stores opened so far, keyed by normalized database name.
struct StoreMap {
    data_dir: PathBuf,
    keys: Arc<KeyProvider>,
    open: Mutex<HashMap<String, Arc<EncryptedStore>>>,
}

impl StoreMap {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<EncryptedStore>>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_or_open(&self, db: &str) -> DbResult<Arc<EncryptedStore>> {
        let name = normalize_db_name(db);
        if name.is_empty() {
            return Err(DbError::InvalidInput("empty database name".to_string()));
        }

        let mut open = self.lock();
        if let Some(store) = open.get(&name) {
            return Ok(Arc::clone(store));
        }
        let path = self.data_dir.join(format!("{name}.db"));
        let store = Arc::new(EncryptedStore::open(&name, &path, Arc::clone(&self.keys))?);
        open.insert(name, Arc::clone(&store));
        Ok(store)
    }
}

/// Explicitly constructed service multiplexing all encrypted stores.
pub struct DatabaseManager {
    data_dir: PathBuf,
    keys: Arc<KeyProvider>,
    registry: Arc<SensitivityRegistry>,
    stores: Arc<StoreMap>,
    self_test: SelfTest,
}

impl DatabaseManager {
    pub fn new(config: &FieldsealConfig) -> Self {
        Self::with_parts(
            config.data_dir.clone(),
            Arc::new(config.key_provider()),
            config.registry(),
        )
    }

    /// Builds a manager and runs the self-test. A failed self-test is
    /// logged and kept; it does not prevent construction.
    pub fn with_parts(
        data_dir: impl Into<PathBuf>,
        keys: Arc<KeyProvider>,
        registry: SensitivityRegistry,
    ) -> Self {
        let data_dir = data_dir.into();
        let self_test = SelfTest::run(&keys);
        match &self_test {
            SelfTest::Passed => info!(data_dir = %data_dir.display(), "Encryption self-test passed"),
            SelfTest::Failed(reason) => {
                error!(data_dir = %data_dir.display(), reason = %reason, "Encryption self-test failed")
            }
        }

        let stores = Arc::new(StoreMap {
            data_dir: data_dir.clone(),
            keys: Arc::clone(&keys),
            open: Mutex::new(HashMap::new()),
        });
        Self {
            data_dir,
            keys,
            registry: Arc::new(registry),
            stores,
            self_test,
        }
    }

    pub fn self_test(&self) -> &SelfTest {
        &self.self_test
    }

    pub fn registry(&self) -> &SensitivityRegistry {
        &self.registry
    }

    pub fn key_provider(&self) -> &KeyProvider {
        &self.keys
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<data_dir>/<normalized name>.db`
    pub fn database_path(&self, db: &str) -> PathBuf {
        self.data_dir.join(format!("{}.db", normalize_db_name(db)))
    }

    /// The store for `db`, opening it on first use.
    ///
    /// Opening touches the file system; async callers go through the
    /// statement methods, which do this on the blocking pool.
    pub fn store(&self, db: &str) -> DbResult<Arc<EncryptedStore>> {
        self.stores.get_or_open(db)
    }

    /// Names of the databases opened so far, sorted.
    pub fn open_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn insert(&self, db: &str, table: &str, row: Row) -> DbResult<ExecOutcome> {
        let table = table.to_string();
        self.run(db, move |tx| tx.insert(&table, &row)).await
    }

    pub async fn update(
        &self,
        db: &str,
        table: &str,
        row: Row,
        where_clause: &str,
        where_params: Vec<SqlValue>,
    ) -> DbResult<ExecOutcome> {
        let table = table.to_string();
        let where_clause = where_clause.to_string();
        self.run(db, move |tx| tx.update(&table, &row, &where_clause, &where_params))
            .await
    }

    /// Runs a query and opens the sensitive columns of `table`.
    ///
    /// Without `table`, the first identifier after `FROM` is used; when none
    /// is found, no columns are opened.
    pub async fn query(
        &self,
        db: &str,
        sql: &str,
        params: Vec<SqlValue>,
        table: Option<&str>,
    ) -> DbResult<Vec<Row>> {
        let sql = sql.to_string();
        let table = table.map(str::to_string);
        self.run(db, move |tx| tx.query(&sql, &params, table.as_deref()))
            .await
    }

    /// Like [`query`](Self::query), returning only the first row.
    pub async fn get(
        &self,
        db: &str,
        sql: &str,
        params: Vec<SqlValue>,
        table: Option<&str>,
    ) -> DbResult<Option<Row>> {
        let sql = sql.to_string();
        let table = table.map(str::to_string);
        self.run(db, move |tx| tx.get(&sql, &params, table.as_deref()))
            .await
    }

    pub async fn execute(&self, db: &str, sql: &str, params: Vec<SqlValue>) -> DbResult<ExecOutcome> {
        let sql = sql.to_string();
        self.run(db, move |tx| tx.execute(&sql, &params)).await
    }

    /// Runs `f` inside a transaction on `db`'s store.
    pub async fn transaction<T, F>(&self, db: &str, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ManagedTransaction<'_>) -> DbResult<T> + Send + 'static,
    {
        let stores = Arc::clone(&self.stores);
        let registry = Arc::clone(&self.registry);
        let db = db.to_string();
        tokio::task::spawn_blocking(move || {
            let store = stores.get_or_open(&db)?;
            let name = store.name().to_string();
            store.transaction(|session| {
                f(&ManagedTransaction {
                    db: &name,
                    session,
                    registry: &registry,
                })
            })
        })
        .await?
    }

    async fn run<T, F>(&self, db: &str, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ManagedTransaction<'_>) -> DbResult<T> + Send + 'static,
    {
        let stores = Arc::clone(&self.stores);
        let registry = Arc::clone(&self.registry);
        let db = db.to_string();
        tokio::task::spawn_blocking(move || {
            let store = stores.get_or_open(&db)?;
            store.session(|session| {
                f(&ManagedTransaction {
                    db: store.name(),
                    session,
                    registry: &registry,
                })
            })
        })
        .await?
    }

    /// Closes every open store concurrently and forgets them.
    ///
    /// All stores are closed even if some fail; the first failure is
    /// returned.
    pub async fn close_all(&self) -> DbResult<()> {
        let map = Arc::clone(&self.stores);
        let stores: Vec<Arc<EncryptedStore>> = tokio::task::spawn_blocking(move || {
            map.lock().drain().map(|(_, store)| store).collect()
        })
        .await?;
        if stores.is_empty() {
            return Ok(());
        }

        let count = stores.len();
        let mut tasks = JoinSet::new();
        for store in stores {
            tasks.spawn_blocking(move || {
                let result = store.close();
                (store.name().to_string(), result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((name, Err(e))) => {
                    warn!(db = %name, error = %e, "Failed to close database");
                    Err(e)
                }
                Ok((_, Ok(()))) => Ok(()),
                Err(e) => Err(DbError::from(e)),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        info!(count, "Closed all databases");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("data_dir", &self.data_dir)
            .field("self_test", &self.self_test)
            .field("open", &self.open_databases())
            .finish()
    }
}

fn resolve_sensitive(
    registry: &SensitivityRegistry,
    db: &str,
    sql: &str,
    table: Option<&str>,
) -> Vec<String> {
    let table = match table {
        Some(table) => table.to_string(),
        None => match extract_table_name(sql) {
            Some(table) => {
                debug!(db, table = %table, "Inferred table from query");
                table
            }
            None => {
                debug!(db, "No table in query, no columns will be opened");
                return Vec::new();
            }
        },
    };
    registry.sensitive_columns(db, &table).to_vec()
}
