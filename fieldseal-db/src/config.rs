//! Configuration loaded from `fieldseal.toml`.
//!
//! ```toml
//! data_dir = "/home/me/.fieldseal"
//! key_file = "/home/me/.fieldseal/encryption.key"
//! corrupt_key = "regenerate"
//!
//! [registry.activity]
//! activity_log = ["description", "metadata"]
//! ```
//!
//! A missing file yields defaults. An unreadable or invalid file also
//! yields defaults, with a warning: configuration never stops startup.

use crate::registry::{RegistryMap, SensitivityRegistry};
use fieldseal_crypto::{CorruptKeyPolicy, KeyProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the key inside the data directory.
pub const DEFAULT_KEY_FILE: &str = "encryption.key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsealConfig {
    /// Directory holding the key file and one `<name>.db` per database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Overrides `<data_dir>/encryption.key`.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub corrupt_key: CorruptKeyPolicy,
    /// Replaces the built-in registry when present.
    #[serde(default)]
    pub registry: Option<RegistryMap>,
}

impl Default for FieldsealConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            key_file: None,
            corrupt_key: CorruptKeyPolicy::default(),
            registry: None,
        }
    }
}

impl FieldsealConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads `~/.fieldseal/fieldseal.toml`.
    pub fn load() -> Self {
        Self::load_from(default_data_dir().join("fieldseal.toml"))
    }

    /// Loads configuration from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<FieldsealConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}. Falling back to defaults.",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_KEY_FILE))
    }

    pub fn key_provider(&self) -> KeyProvider {
        KeyProvider::with_policy(self.key_path(), self.corrupt_key)
    }

    pub fn registry(&self) -> SensitivityRegistry {
        match &self.registry {
            Some(map) => SensitivityRegistry::new(map.clone()),
            None => SensitivityRegistry::builtin(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".fieldseal")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".fieldseal")
    } else {
        PathBuf::from(".fieldseal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_config_from_str(toml_content: &str) -> FieldsealConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldseal.toml");
        std::fs::write(&path, toml_content).unwrap();
        FieldsealConfig::load_from(path)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FieldsealConfig::load_from(dir.path().join("nope.toml"));
        assert_eq!(config.corrupt_key, CorruptKeyPolicy::Regenerate);
        assert!(config.registry.is_none());
        assert_eq!(config.registry(), SensitivityRegistry::builtin());
    }

    #[test]
    fn parses_full_file() {
        let config = load_config_from_str(
            r#"
data_dir = "/var/lib/fieldseal"
key_file = "/etc/fieldseal/key.bin"
corrupt_key = "refuse"

[registry.activity]
activity_log = ["description", "metadata"]

[registry."Notes.db"]
notes = ["body"]
"#,
        );
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/fieldseal"));
        assert_eq!(config.key_path(), PathBuf::from("/etc/fieldseal/key.bin"));
        assert_eq!(config.corrupt_key, CorruptKeyPolicy::Refuse);

        let registry = config.registry();
        assert!(registry.is_sensitive("activity", "activity_log", "metadata"));
        assert!(registry.is_sensitive("notes", "notes", "body"));
        assert!(!registry.is_sensitive("emails", "emails", "subject"));
    }

    #[test]
    fn key_path_defaults_into_data_dir() {
        let config = load_config_from_str(r#"data_dir = "/srv/fs""#);
        assert_eq!(config.key_path(), PathBuf::from("/srv/fs/encryption.key"));
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let config = load_config_from_str("corrupt_key = [[[");
        assert_eq!(config.corrupt_key, CorruptKeyPolicy::Regenerate);
        assert!(config.registry.is_none());
    }

    #[test]
    fn unknown_policy_falls_back_to_defaults() {
        let config = load_config_from_str(r#"corrupt_key = "shred""#);
        assert_eq!(config.corrupt_key, CorruptKeyPolicy::Regenerate);
    }
}
