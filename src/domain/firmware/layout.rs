//! Flash buffer layout and signature extraction.

use std::fmt;

use crate::domain::constants::{
    DBB_FIRMWARE_LENGTH, FIRMWARE_PAD_BYTE, FIRMWARE_SIGLEN, MIN_DEV_SIGNATURE_CHARS,
};
use crate::infra::error::{DeviceError, DeviceResult};

/// Sizes that define a firmware source and its flash buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareLayout {
    /// Bytes of signature block in front of production images
    pub signature_length: usize,
    /// Size of the flash buffer handed to the bootloader
    pub max_firmware_length: usize,
}

impl FirmwareLayout {
    #[must_use]
    pub fn new(signature_length: usize, max_firmware_length: usize) -> Self {
        Self {
            signature_length,
            max_firmware_length,
        }
    }

    /// Largest accepted source: signature block plus a full flash image
    #[must_use]
    pub fn max_source_length(&self) -> usize {
        self.signature_length + self.max_firmware_length
    }
}

impl Default for FirmwareLayout {
    fn default() -> Self {
        Self::new(FIRMWARE_SIGLEN, DBB_FIRMWARE_LENGTH)
    }
}

/// Image ready for flashing.
#[derive(Clone, PartialEq, Eq)]
pub struct AssembledFirmware {
    /// Flash buffer, always `max_firmware_length` bytes
    pub firmware: Vec<u8>,
    /// Number of payload bytes at the start of `firmware`
    pub firmware_size: usize,
    /// Hex signature sent to the bootloader; empty for unsigned development images
    pub signature_hex: String,
}

impl fmt::Debug for AssembledFirmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledFirmware")
            .field("buffer_len", &self.firmware.len())
            .field("firmware_size", &self.firmware_size)
            .field("signature_chars", &self.signature_hex.len())
            .finish()
    }
}

/// Split a raw source into signature and payload and build the flash buffer.
///
/// Production images (`development_device == false`) carry the signature
/// block in their first `signature_length` bytes; the payload is the rest
/// up to `firmware_size`. Development images are all payload and are signed
/// by `signer`, which sees the padded flash buffer. A signer result shorter
/// than 64 characters is ignored. That check is a length gate only and says
/// nothing about whether the signature is valid.
///
/// # Errors
///
/// Returns `InvalidInput` if `raw` is shorter than the signature block or
/// than `firmware_size`, and `FileError` if the payload is empty or does not
/// fit the flash buffer.
pub fn assemble<F>(
    raw: &[u8],
    firmware_size: usize,
    development_device: bool,
    signer: F,
    layout: &FirmwareLayout,
) -> DeviceResult<AssembledFirmware>
where
    F: FnOnce(&[u8]) -> String,
{
    if raw.len() < layout.signature_length || raw.len() < firmware_size {
        return Err(DeviceError::InvalidInput(format!(
            "firmware buffer of {} bytes cannot hold a {}-byte signature and {firmware_size} bytes of image",
            raw.len(),
            layout.signature_length
        )));
    }

    let (mut signature_hex, body) = if development_device {
        (String::new(), &raw[..firmware_size])
    } else {
        if firmware_size < layout.signature_length {
            return Err(DeviceError::InvalidInput(format!(
                "image of {firmware_size} bytes is smaller than the {}-byte signature block",
                layout.signature_length
            )));
        }
        (
            hex::encode(&raw[..layout.signature_length]),
            &raw[layout.signature_length..firmware_size],
        )
    };

    if body.is_empty() {
        return Err(DeviceError::FileError(
            "firmware image has no payload".to_string(),
        ));
    }
    if body.len() > layout.max_firmware_length {
        return Err(DeviceError::FileError(format!(
            "firmware payload of {} bytes exceeds the {}-byte flash area",
            body.len(),
            layout.max_firmware_length
        )));
    }

    let mut firmware = vec![FIRMWARE_PAD_BYTE; layout.max_firmware_length];
    firmware[..body.len()].copy_from_slice(body);

    if development_device {
        let candidate = signer(&firmware);
        if candidate.len() >= MIN_DEV_SIGNATURE_CHARS {
            signature_hex = candidate;
        } else {
            log::warn!(
                "Development signer returned {} characters (need {MIN_DEV_SIGNATURE_CHARS}), flashing unsigned",
                candidate.len()
            );
        }
    }

    Ok(AssembledFirmware {
        firmware,
        firmware_size: body.len(),
        signature_hex,
    })
}
