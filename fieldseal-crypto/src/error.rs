//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
///
/// These never cross the `seal`/`open` boundary; the `Option`-returning
/// wrappers log them and return `None`.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Input was empty where a value is required.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key or tampered data).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The text is not a well-formed `iv:authTag:ciphertext` envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The key file exists but is unusable and the policy forbids replacing it.
    #[error("corrupt key file {path}: {reason}")]
    CorruptKey { path: String, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
