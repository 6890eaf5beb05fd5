//! Firmware source loading.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::layout::FirmwareLayout;
use crate::domain::constants::FIRMWARE_PAD_BYTE;
use crate::infra::error::{DeviceError, DeviceResult};

/// Where a firmware image comes from.
#[derive(Debug, Clone)]
pub enum FirmwareSource {
    /// Image file on disk (signature block included for production builds)
    Path(PathBuf),
    /// Image already in memory; `firmware_size` counts the valid bytes
    Buffer { bytes: Vec<u8>, firmware_size: usize },
}

impl From<PathBuf> for FirmwareSource {
    fn from(path: PathBuf) -> Self {
        FirmwareSource::Path(path)
    }
}

/// Load a firmware source and return its bytes with the image size.
///
/// Files are read into a buffer of `layout.max_source_length()` bytes padded
/// with `0xFF`, and the returned size is the file length. At most one byte
/// past the maximum is ever read, so devices and pipes cannot stall the load.
///
/// # Errors
///
/// Returns `FileError` if the file is missing or unreadable, or if the image
/// is empty or larger than `layout.max_source_length()`.
pub fn load_from_source(
    source: FirmwareSource,
    layout: &FirmwareLayout,
) -> DeviceResult<(Vec<u8>, usize)> {
    let max = layout.max_source_length();
    match source {
        FirmwareSource::Path(path) => {
            let data = read_bounded(&path, max).map_err(|e| {
                DeviceError::FileError(format!(
                    "Failed to read firmware file {}: {e}",
                    path.display()
                ))
            })?;
            let firmware_size = data.len();
            check_size(firmware_size, max)?;
            log::debug!(
                "Loaded firmware file {} ({firmware_size} bytes)",
                path.display()
            );

            let mut buffer = data;
            buffer.resize(max, FIRMWARE_PAD_BYTE);
            Ok((buffer, firmware_size))
        }
        FirmwareSource::Buffer {
            bytes,
            firmware_size,
        } => {
            check_size(firmware_size, max)?;
            Ok((bytes, firmware_size))
        }
    }
}

/// Read up to `max + 1` bytes, rejecting regular files whose length is
/// already known to be too large.
fn read_bounded(path: &Path, max: usize) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    if metadata.is_file() && metadata.len() > max as u64 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("file of {} bytes exceeds the {max}-byte maximum", metadata.len()),
        ));
    }

    let mut data = Vec::with_capacity(max + 1);
    file.take(max as u64 + 1).read_to_end(&mut data)?;
    Ok(data)
}

fn check_size(firmware_size: usize, max: usize) -> DeviceResult<()> {
    if firmware_size == 0 {
        return Err(DeviceError::FileError("firmware image is empty".to_string()));
    }
    if firmware_size > max {
        return Err(DeviceError::FileError(format!(
            "firmware image of {firmware_size} bytes exceeds the {max}-byte maximum"
        )));
    }
    Ok(())
}
