//! Which columns hold sensitive data.
//!
//! The registry maps `(database, table)` to the columns that are sealed on
//! write and opened on read. It is built once at startup and never changes;
//! columns that are not listed are never touched by the encryption layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{ database: { table: [column, ...] } }`
pub type RegistryMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Static `(database, table) -> columns` mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensitivityRegistry {
    databases: RegistryMap,
}

impl SensitivityRegistry {
    /// Builds a registry from a nested map. Database names are normalized.
    pub fn new(map: RegistryMap) -> Self {
        let mut databases: RegistryMap = BTreeMap::new();
        for (db, tables) in map {
            let entry = databases.entry(normalize_db_name(&db)).or_default();
            for (table, columns) in tables {
                let cols = entry.entry(table).or_default();
                for column in columns {
                    if !cols.contains(&column) {
                        cols.push(column);
                    }
                }
            }
        }
        Self { databases }
    }

    /// Registry used when the configuration does not provide one.
    pub fn builtin() -> Self {
        let mut map = RegistryMap::new();
        let mut add = |db: &str, table: &str, cols: &[&str]| {
            map.entry(db.to_string())
                .or_default()
                .insert(table.to_string(), cols.iter().map(|c| c.to_string()).collect());
        };
        add("emails", "emails", &["subject", "body", "snippet", "sender", "recipients"]);
        add("history", "browsing_history", &["url", "title"]);
        add("activity", "activity_log", &["description", "metadata"]);
        add(
            "calendar",
            "calendar_events",
            &["summary", "description", "location", "attendees"],
        );
        Self::new(map)
    }

    /// Sensitive columns for `(db, table)`; empty when unregistered.
    pub fn sensitive_columns(&self, db: &str, table: &str) -> &[String] {
        self.databases
            .get(&normalize_db_name(db))
            .and_then(|tables| tables.get(table))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_sensitive(&self, db: &str, table: &str, column: &str) -> bool {
        self.sensitive_columns(db, table).iter().any(|c| c == column)
    }

    /// Registered tables of one database.
    pub fn tables(&self, db: &str) -> impl Iterator<Item = (&str, &[String])> {
        self.databases
            .get(&normalize_db_name(db))
            .into_iter()
            .flat_map(|tables| tables.iter().map(|(t, c)| (t.as_str(), c.as_slice())))
    }

    /// Every `(database, table, columns)` entry, in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.databases.iter().flat_map(|(db, tables)| {
            tables
                .iter()
                .map(move |(t, c)| (db.as_str(), t.as_str(), c.as_slice()))
        })
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.databases.values().all(|tables| tables.is_empty())
    }
}

/// Canonical database name: trimmed, lowercase, without a `.db` suffix.
pub fn normalize_db_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.strip_suffix(".db") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => lower,
    }
}
