//! Key file lifecycle.
//!
//! One 256-bit key per installation, stored as 32 raw bytes in a file that
//! only the owning user can read or write. The file is created on first use.
//! A [`KeyProvider`] loads the key once and hands out the same key for the
//! rest of its life; a replaced file is only seen by a new provider.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// The installation's symmetric key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Creates a key from a slice, rejecting anything but exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_bytes(array))
    }

    /// Generates a key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// What to do when the key file exists but cannot be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptKeyPolicy {
    /// Replace the file with a fresh key. Values sealed under the old key
    /// become permanently unreadable.
    #[default]
    Regenerate,
    /// Leave the file alone and report [`CryptoError::CorruptKey`].
    Refuse,
}

/// State of the key file, inspected without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Missing,
    Valid,
    Corrupt { len: usize },
    Unreadable(String),
}

/// Owns the key file and hands out the key it contains.
#[derive(Debug)]
pub struct KeyProvider {
    path: PathBuf,
    policy: CorruptKeyPolicy,
    loaded: Mutex<Option<EncryptionKey>>,
}

impl KeyProvider {
    /// Creates a provider for `path` that regenerates corrupt keys.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_policy(path, CorruptKeyPolicy::default())
    }

    pub fn with_policy(path: impl Into<PathBuf>, policy: CorruptKeyPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            loaded: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> CorruptKeyPolicy {
        self.policy
    }

    /// Reports the state of the key file without creating or replacing it.
    pub fn status(&self) -> KeyStatus {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.len() == KEY_SIZE => KeyStatus::Valid,
            Ok(bytes) => KeyStatus::Corrupt { len: bytes.len() },
            Err(e) if e.kind() == io::ErrorKind::NotFound => KeyStatus::Missing,
            Err(e) => KeyStatus::Unreadable(e.to_string()),
        }
    }

    /// Returns the installation key, creating it on first use.
    ///
    /// The file is read on the first successful call only; later calls
    /// return the same key. A key file of the wrong length, or one that
    /// cannot be read, is handled according to the provider's
    /// [`CorruptKeyPolicy`]. Under the default policy this never fails: if
    /// the new key cannot be written it is still returned and kept in memory
    /// until the provider is dropped.
    pub fn get_key(&self) -> CryptoResult<EncryptionKey> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = loaded.as_ref() {
            return Ok(key.clone());
        }
        let key = self.load()?;
        *loaded = Some(key.clone());
        Ok(key)
    }

    fn load(&self) -> CryptoResult<EncryptionKey> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.len() == KEY_SIZE => EncryptionKey::from_slice(&bytes),
            Ok(bytes) => {
                warn!(
                    path = %self.path.display(),
                    len = bytes.len(),
                    "Key file has wrong length"
                );
                self.replace_unusable(format!(
                    "expected {KEY_SIZE} bytes, found {}",
                    bytes.len()
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No key file found, generating a new key");
                Ok(self.generate_and_persist())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read key file");
                self.replace_unusable(e.to_string())
            }
        }
    }

    fn replace_unusable(&self, reason: String) -> CryptoResult<EncryptionKey> {
        match self.policy {
            CorruptKeyPolicy::Refuse => Err(CryptoError::CorruptKey {
                path: self.path.display().to_string(),
                reason,
            }),
            CorruptKeyPolicy::Regenerate => {
                warn!(
                    path = %self.path.display(),
                    "Regenerating encryption key; values sealed under the previous key can no longer be opened"
                );
                Ok(self.generate_and_persist())
            }
        }
    }

    fn generate_and_persist(&self) -> EncryptionKey {
        let key = EncryptionKey::generate();
        match write_key_file(&self.path, key.as_bytes()) {
            Ok(()) => info!(path = %self.path.display(), "Persisted new encryption key"),
            Err(e) => error!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist encryption key; it will be lost when the process exits"
            ),
        }
        key
    }
}

fn write_key_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        // `mode` only applies when the file is created.
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        let mut file = fs::File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    Ok(())
}
