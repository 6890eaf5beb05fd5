use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::domain::constants::DERIVED_KEY_LENGTH;

/// 32-byte AES key derived from a passphrase.
///
/// Lives for a single encrypt or decrypt call and is zeroed when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; DERIVED_KEY_LENGTH]);

impl DerivedKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DERIVED_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Derive the envelope key from a passphrase.
///
/// With `hash` set the key is `SHA256(SHA256(passphrase))`. The device wipes
/// itself after a handful of failed attempts, so no stretching is applied.
/// Without `hash` the raw passphrase bytes are copied in, truncated to 32
/// bytes or zero-padded.
#[must_use]
pub fn derive_key(passphrase: &[u8], hash: bool) -> DerivedKey {
    let mut key = [0u8; DERIVED_KEY_LENGTH];
    if hash {
        let inner: Zeroizing<[u8; DERIVED_KEY_LENGTH]> =
            Zeroizing::new(Sha256::digest(passphrase).into());
        key.copy_from_slice(&Sha256::digest(inner.as_slice()));
    } else {
        let len = passphrase.len().min(DERIVED_KEY_LENGTH);
        key[..len].copy_from_slice(&passphrase[..len]);
    }
    let derived = DerivedKey(key);
    key.zeroize();
    derived
}
