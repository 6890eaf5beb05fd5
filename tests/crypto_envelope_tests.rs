//! Envelope encryption properties: round-trip, IV freshness and
//! passphrase rotation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dbb_bridge::domain::crypto::{
    decode_and_decrypt, decode_and_decrypt_hashed, decrypt_possible_ciphertext, encrypt_and_encode,
};
use dbb_bridge::DeviceError;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_recovers_plaintext(
        plaintext in "\\PC{1,300}",
        passphrase in "\\PC{1,40}",
    ) {
        let encoded = encrypt_and_encode(&plaintext, &passphrase).unwrap();
        let decoded = decode_and_decrypt_hashed(&encoded, &passphrase).unwrap();
        prop_assert_eq!(decoded.as_str(), plaintext.as_str());
    }

    #[test]
    fn ciphertext_is_whole_blocks_after_iv(plaintext in "[ -~]{1,200}") {
        let encoded = encrypt_and_encode(&plaintext, "secret").unwrap();
        let raw = STANDARD.decode(encoded).unwrap();
        let body = raw.len() - 16;
        prop_assert_eq!(body % 16, 0);
        // PKCS#7 always adds at least one byte
        prop_assert!(body > plaintext.len());
    }
}

#[test]
fn test_iv_is_fresh_per_encryption() {
    let first = STANDARD
        .decode(encrypt_and_encode("{\"seed\":\"x\"}", "pass").unwrap())
        .unwrap();
    let second = STANDARD
        .decode(encrypt_and_encode("{\"seed\":\"x\"}", "pass").unwrap())
        .unwrap();
    assert_ne!(first[..16], second[..16]);
    assert_ne!(first, second);
}

#[test]
fn test_unhashed_key_does_not_open_hashed_envelope() {
    let encoded = encrypt_and_encode("{\"a\":1}", "pw").unwrap();
    assert!(decode_and_decrypt(&encoded, "pw", true).is_ok());
    // The unhashed key differs, so this fails padding or yields garbage
    if let Ok(text) = decode_and_decrypt(&encoded, "pw", false) {
        assert_ne!(text.as_str(), "{\"a\":1}");
    }
}

#[test]
fn test_empty_passphrase_is_crypto_error() {
    assert!(matches!(
        encrypt_and_encode("{}", ""),
        Err(DeviceError::CryptoError(_))
    ));
    assert!(matches!(
        decode_and_decrypt_hashed("AAAA", ""),
        Err(DeviceError::CryptoError(_))
    ));
}

#[test]
fn test_reply_under_new_passphrase_after_password_change() {
    let reply = format!(
        "{{\"ciphertext\":\"{}\"}}",
        encrypt_and_encode("{\"password\":\"success\"}", "new-pass").unwrap()
    );

    let decrypted =
        decrypt_possible_ciphertext("{\"password\":\"new-pass\"}", &reply, "old-pass").unwrap();
    assert_eq!(decrypted.as_str(), "{\"password\":\"success\"}");

    // Without the password field the old passphrase is used and fails
    assert!(decrypt_possible_ciphertext("{\"led\":\"blink\"}", &reply, "old-pass").is_none());
}

#[test]
fn test_non_envelope_replies_are_left_alone() {
    for reply in [
        "not json at all",
        "{\"ciphertext\":42}",
        "{\"echo\":\"abc\"}",
        "[\"ciphertext\"]",
        "",
    ] {
        assert!(decrypt_possible_ciphertext("{}", reply, "pw").is_none(), "{reply}");
    }
}
