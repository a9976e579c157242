use fieldseal_crypto::CryptoError;

#[test]
fn error_display_empty_input() {
    let err = CryptoError::EmptyInput("plaintext");
    assert!(format!("{err}").contains("empty input"));
    assert!(format!("{err}").contains("plaintext"));
}

#[test]
fn error_display_encryption() {
    let err = CryptoError::Encryption("oops".into());
    assert!(format!("{err}").contains("encryption failed"));
}

#[test]
fn error_display_decryption() {
    let err = CryptoError::Decryption("tampered".into());
    assert!(format!("{err}").contains("decryption failed"));
}

#[test]
fn error_display_malformed_envelope() {
    let err = CryptoError::MalformedEnvelope("expected 3 fields, found 2".into());
    let msg = format!("{err}");
    assert!(msg.contains("malformed envelope"));
    assert!(msg.contains("found 2"));
}

#[test]
fn error_display_invalid_key_length() {
    let err = CryptoError::InvalidKeyLength {
        expected: 32,
        actual: 16,
    };
    let msg = format!("{err}");
    assert!(msg.contains("32"));
    assert!(msg.contains("16"));
}

#[test]
fn error_display_corrupt_key() {
    let err = CryptoError::CorruptKey {
        path: "/tmp/encryption.key".into(),
        reason: "expected 32 bytes, found 5".into(),
    };
    let msg = format!("{err}");
    assert!(msg.contains("/tmp/encryption.key"));
    assert!(msg.contains("found 5"));
}

#[test]
fn error_from_serde_json() {
    let serde_err: Result<serde_json::Value, _> = serde_json::from_str("not json");
    let crypto_err: CryptoError = serde_err.unwrap_err().into();
    assert!(format!("{crypto_err}").contains("serialization"));
}

#[test]
fn error_is_debug() {
    let err = CryptoError::Encryption("test".into());
    let _ = format!("{err:?}");
}
