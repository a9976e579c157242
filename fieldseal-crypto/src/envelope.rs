//! Value envelopes using AES-256-GCM.
//!
//! A sealed value is stored as `hex(iv):hex(authTag):hex(ciphertext)` with a
//! 16-byte random IV drawn for every call and a 16-byte tag.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{EncryptionKey, KeyProvider};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::warn;

/// Size of the IV in bytes (128 bits).
pub const IV_SIZE: usize = 16;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A parsed envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Parses `iv:authTag:ciphertext`.
    pub fn parse(text: &str) -> CryptoResult<Self> {
        let fields: Vec<&str> = text.split(':').collect();
        let [iv, tag, ciphertext] = fields.as_slice() else {
            return Err(CryptoError::MalformedEnvelope(format!(
                "expected 3 fields, found {}",
                fields.len()
            )));
        };

        let iv = decode_fixed::<IV_SIZE>(iv, "iv")?;
        let tag = decode_fixed::<TAG_SIZE>(tag, "authTag")?;
        let ciphertext = hex::decode(ciphertext)
            .map_err(|e| CryptoError::MalformedEnvelope(format!("ciphertext: {e}")))?;
        if ciphertext.is_empty() {
            return Err(CryptoError::MalformedEnvelope("empty ciphertext".into()));
        }

        Ok(Self {
            iv,
            tag,
            ciphertext,
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }
}

fn decode_fixed<const N: usize>(field: &str, name: &str) -> CryptoResult<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(field, &mut out)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("{name}: {e}")))?;
    Ok(out)
}

/// Seals and opens individual values under one key.
///
/// The `try_*` methods report why an operation failed. The plain methods
/// log the failure and return `None`, which callers read as "could not
/// seal/open", never as an error.
pub struct FieldCipher {
    cipher: Aes256Gcm16,
}

impl FieldCipher {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm16::new(key.as_bytes().into()),
        }
    }

    /// Builds a cipher from the provider's current key.
    pub fn from_provider(provider: &KeyProvider) -> CryptoResult<Self> {
        Ok(Self::new(&provider.get_key()?))
    }

    pub fn try_seal(&self, plaintext: &str) -> CryptoResult<Envelope> {
        if plaintext.is_empty() {
            return Err(CryptoError::EmptyInput("plaintext"));
        }

        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext.
        let tag_bytes = sealed.split_off(sealed.len() - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&tag_bytes);

        Ok(Envelope {
            iv,
            tag,
            ciphertext: sealed,
        })
    }

    pub fn try_open(&self, text: &str) -> CryptoResult<String> {
        let envelope = Envelope::parse(text)?;

        let mut combined = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
        combined.extend_from_slice(&envelope.ciphertext);
        combined.extend_from_slice(&envelope.tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::<U16>::from_slice(&envelope.iv), combined.as_ref())
            .map_err(|_| {
                CryptoError::Decryption("authentication failed (wrong key or tampered data)".into())
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
    }

    pub fn try_seal_object<T: Serialize + ?Sized>(&self, value: &T) -> CryptoResult<Envelope> {
        let text = serde_json::to_string(value)?;
        self.try_seal(&text)
    }

    pub fn try_open_object<T: DeserializeOwned>(&self, text: &str) -> CryptoResult<T> {
        let json = self.try_open(text)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Seals `plaintext`, or returns `None` for empty input or a cipher failure.
    pub fn seal(&self, plaintext: &str) -> Option<String> {
        match self.try_seal(plaintext) {
            Ok(envelope) => Some(envelope.to_string()),
            Err(e) => {
                warn!(error = %e, "Failed to seal value");
                None
            }
        }
    }

    /// Opens an envelope, or returns `None` if it cannot be authenticated.
    pub fn open(&self, text: &str) -> Option<String> {
        match self.try_open(text) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                warn!(error = %e, "Failed to open envelope");
                None
            }
        }
    }

    /// Seals the JSON encoding of `value`.
    pub fn seal_object<T: Serialize + ?Sized>(&self, value: &T) -> Option<String> {
        match self.try_seal_object(value) {
            Ok(envelope) => Some(envelope.to_string()),
            Err(e) => {
                warn!(error = %e, "Failed to seal structured value");
                None
            }
        }
    }

    /// Opens an envelope and parses its plaintext as JSON.
    pub fn open_object<T: DeserializeOwned>(&self, text: &str) -> Option<T> {
        match self.try_open_object(text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Failed to open structured envelope");
                None
            }
        }
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
