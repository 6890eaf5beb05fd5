//! Firmware image handling.
//!
//! Loads a firmware source (file or memory), splits off the production
//! signature block and lays the payload out in a fixed-size flash buffer
//! padded with `0xFF`. Development images get their signature from a
//! caller-supplied signer instead.

mod layout;
mod source;

pub use layout::{assemble, AssembledFirmware, FirmwareLayout};
pub use source::{load_from_source, FirmwareSource};
