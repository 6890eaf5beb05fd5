//! Encrypted command envelope.
//!
//! Provides:
//! - Passphrase key derivation (double SHA-256 or raw copy) into a key that
//!   wipes itself on drop
//! - `IV || AES-256-CBC` framing, base64-encoded for the wire
//! - Reply unframing with passphrase-rotation detection
//!
//! Every secret buffer in this module is held in a `zeroize` wrapper, so key
//! material is cleared on every exit path, including early returns.

mod envelope;
mod key;

pub use envelope::{
    decode_and_decrypt, decode_and_decrypt_hashed, decrypt_possible_ciphertext,
    encrypt_and_encode,
};
pub use key::{derive_key, DerivedKey};
