//! Protocol constants shared by the codec, the firmware assembler and the transports.
//! Keep this intentionally small; only broadly reused literals should live here.

use std::time::Duration;

// === Envelope ===

/// AES block size; also the IV length prefixed to every envelope.
pub const AES_BLOCK_SIZE: usize = 16;

/// Length of a derived AES-256 key.
pub const DERIVED_KEY_LENGTH: usize = 32;

/// JSON field carrying an encrypted payload in device replies.
pub const CIPHERTEXT_FIELD: &str = "ciphertext";

/// JSON field of a password-rotation command (holds the new passphrase).
pub const PASSWORD_FIELD: &str = "password";

// === Firmware ===

/// Signature block in front of production images: 7 ECDSA signatures of 64 bytes.
pub const FIRMWARE_SIGLEN: usize = 7 * 64;

/// Flash area reserved for the application firmware.
pub const DBB_FIRMWARE_LENGTH: usize = 225_280;

/// Bootloader write granularity.
pub const FIRMWARE_CHUNKSIZE: usize = 4096;

/// Fill byte for unused flash.
pub const FIRMWARE_PAD_BYTE: u8 = 0xFF;

/// Minimum length a development signer must return to be used.
pub const MIN_DEV_SIGNATURE_CHARS: usize = 64;

// === Timing ===

/// Default interval between presence polls.
pub const FIND_DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default bound on a single USB transfer.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

// === USB ===

/// Digital Bitbox USB vendor ID.
pub const DBB_VENDOR_ID: u16 = 0x03eb;

/// Digital Bitbox USB product ID (firmware and bootloader).
pub const DBB_PRODUCT_ID: u16 = 0x2402;
