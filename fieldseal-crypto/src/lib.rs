//! Field-level encryption primitives for fieldseal.
//!
//! - [`KeyProvider`] owns the installation key file.
//! - [`FieldCipher`] seals single values into `iv:authTag:ciphertext`
//!   envelopes and opens them again.
//! - [`looks_encrypted`] tells envelopes apart from legacy plaintext.

mod envelope;
mod error;
mod key;
mod sniff;

pub use envelope::{Envelope, FieldCipher, IV_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{CorruptKeyPolicy, EncryptionKey, KEY_SIZE, KeyProvider, KeyStatus};
pub use sniff::{HEX_FIELD_LEN, looks_encrypted, looks_encrypted_opt, looks_encrypted_value};
