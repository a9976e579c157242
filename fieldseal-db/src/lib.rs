//! SQLite storage with transparent per-column encryption.
//!
//! - [`EncryptedStore`] wraps one database file and seals/opens the columns
//!   a caller names as sensitive.
//! - [`SensitivityRegistry`] records which columns of which tables are
//!   sensitive.
//! - [`DatabaseManager`] opens stores lazily and resolves sensitive columns
//!   from the registry for every call.
//! - [`Backfill`] seals existing plaintext in place, after a backup.

mod backfill;
mod config;
mod error;
mod manager;
mod registry;
mod sql;
mod store;
mod value;

pub use backfill::{
    Backfill, BackfillPlan, BackfillReport, BackfillTarget, DEFAULT_ID_COLUMN, DatabaseReport,
    TableReport, backup_file,
};
pub use config::{DEFAULT_KEY_FILE, FieldsealConfig};
pub use error::{DbError, DbResult};
pub use manager::{DatabaseManager, ManagedTransaction, SelfTest};
pub use registry::{RegistryMap, SensitivityRegistry, normalize_db_name};
pub use sql::{extract_table_name, quote_ident};
pub use store::{EncryptedStore, ExecOutcome, NO_SENSITIVE_COLUMNS, StoreSession};
pub use value::{Row, SqlValue};
