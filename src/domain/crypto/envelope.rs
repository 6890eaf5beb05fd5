use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use base64::Engine;
use serde_json::Value;
use zeroize::Zeroizing;

use super::key::derive_key;
use crate::domain::constants::{AES_BLOCK_SIZE, CIPHERTEXT_FIELD, PASSWORD_FIELD};
use crate::domain::types::Passphrase;
use crate::infra::error::{DeviceError, DeviceResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt `plaintext` and return `base64(IV || AES-256-CBC(plaintext))`.
///
/// The IV is fresh random bytes on every call. The key is always the double
/// SHA-256 of the passphrase.
///
/// # Errors
///
/// Returns `CryptoError` if the passphrase is empty.
pub fn encrypt_and_encode(plaintext: &str, passphrase: &str) -> DeviceResult<String> {
    if passphrase.is_empty() {
        return Err(DeviceError::CryptoError(
            "cannot encrypt with an empty passphrase".to_string(),
        ));
    }

    let key = derive_key(passphrase.as_bytes(), true);

    let mut iv = [0u8; AES_BLOCK_SIZE];
    rand::fill(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| DeviceError::CryptoError(format!("cipher setup failed: {e}")))?;
    let ciphertext = Zeroizing::new(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes()));

    let mut envelope = Zeroizing::new(Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len()));
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(envelope.as_slice()))
}

/// Decode a base64 envelope and decrypt it.
///
/// The first 16 decoded bytes are the IV; the rest is ciphertext.
///
/// # Errors
///
/// Returns `CryptoError` for empty inputs, malformed base64, an envelope
/// shorter than one IV, bad padding (wrong key or corrupt data), an empty
/// plaintext or a plaintext that is not UTF-8.
pub fn decode_and_decrypt(
    base64_ciphertext: &str,
    passphrase: &str,
    hash: bool,
) -> DeviceResult<Zeroizing<String>> {
    if base64_ciphertext.is_empty() || passphrase.is_empty() {
        return Err(DeviceError::CryptoError(
            "ciphertext and passphrase must not be empty".to_string(),
        ));
    }

    let envelope = Zeroizing::new(
        base64::engine::general_purpose::STANDARD.decode(base64_ciphertext.trim())?,
    );
    if envelope.len() < AES_BLOCK_SIZE {
        return Err(DeviceError::CryptoError(format!(
            "envelope too short: {} bytes",
            envelope.len()
        )));
    }
    let (iv, ciphertext) = envelope.split_at(AES_BLOCK_SIZE);

    let key = derive_key(passphrase.as_bytes(), hash);
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| DeviceError::CryptoError(format!("cipher setup failed: {e}")))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| DeviceError::CryptoError("decryption failed".to_string()))?,
    );
    if plaintext.is_empty() {
        return Err(DeviceError::CryptoError(
            "decryption produced no data".to_string(),
        ));
    }

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| DeviceError::CryptoError("plaintext is not valid UTF-8".to_string()))?;
    Ok(Zeroizing::new(text.to_owned()))
}

/// [`decode_and_decrypt`] with the hashed key derivation used by the device.
///
/// # Errors
///
/// See [`decode_and_decrypt`].
pub fn decode_and_decrypt_hashed(
    base64_ciphertext: &str,
    passphrase: &str,
) -> DeviceResult<Zeroizing<String>> {
    decode_and_decrypt(base64_ciphertext, passphrase, true)
}

/// Decrypt a device reply if it carries an encrypted envelope.
///
/// Returns `None` when the reply is not JSON, has no string `"ciphertext"`
/// field, or cannot be decrypted; the caller then uses the raw reply.
///
/// `original_command` is the plaintext request that produced the reply. A
/// `"password"` field in it means the device switched passphrases and
/// answers under the new one, so that value is used instead of `passphrase`.
pub fn decrypt_possible_ciphertext(
    original_command: &str,
    response_json: &str,
    passphrase: &str,
) -> Option<Zeroizing<String>> {
    let response: Value = serde_json::from_str(response_json).ok()?;
    let ciphertext = response.get(CIPHERTEXT_FIELD)?.as_str()?;

    let mut resolved = Passphrase::new(passphrase);
    if let Ok(Value::Object(mut request)) = serde_json::from_str::<Value>(original_command) {
        if let Some(Value::String(new_passphrase)) = request.remove(PASSWORD_FIELD) {
            log::debug!("[Decryption] password command detected, using new passphrase");
            resolved = Passphrase::from(new_passphrase);
        }
    }

    match decode_and_decrypt(ciphertext, resolved.as_str(), true) {
        Ok(plaintext) => Some(plaintext),
        Err(e) => {
            log::debug!("[Decryption] reply not decrypted: {e}");
            None
        }
    }
}
