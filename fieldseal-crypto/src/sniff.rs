//! Envelope shape detection.
//!
//! Decides from the text alone whether a stored value should be handed to
//! [`FieldCipher::open`](crate::FieldCipher::open). There is no format tag:
//! legacy plaintext that happens to have the envelope shape is
//! indistinguishable from a real envelope.

use serde_json::Value;

/// Hex characters in the `iv` and `authTag` fields.
pub const HEX_FIELD_LEN: usize = 32;

/// Returns true iff `value` has the shape `<32 hex>:<32 hex>:<non-empty>`.
pub fn looks_encrypted(value: &str) -> bool {
    let mut fields = value.split(':');
    let (Some(iv), Some(tag), Some(ciphertext), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return false;
    };
    is_hex_field(iv) && is_hex_field(tag) && !ciphertext.is_empty()
}

/// [`looks_encrypted`] for an optional value; `None` is never encrypted.
pub fn looks_encrypted_opt(value: Option<&str>) -> bool {
    value.is_some_and(looks_encrypted)
}

/// [`looks_encrypted`] for a row cell; only strings can be envelopes.
pub fn looks_encrypted_value(value: &Value) -> bool {
    match value {
        Value::String(s) => looks_encrypted(s),
        _ => false,
    }
}

fn is_hex_field(field: &str) -> bool {
    field.len() == HEX_FIELD_LEN && field.bytes().all(|b| b.is_ascii_hexdigit())
}
