//! Type-safe wrappers using new-type pattern
//!
//! Device state, identifiers and secrets exchanged between the manager,
//! the codec and the transports.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Presence state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    /// Nothing matching is attached.
    #[default]
    NoDevice,
    /// Device is running the application firmware.
    Firmware,
    /// Device is in bootloader (firmware update) mode.
    Bootloader,
}

impl DeviceState {
    /// Whether a device is attached in any mode
    pub fn is_present(self) -> bool {
        !matches!(self, DeviceState::NoDevice)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::NoDevice => write!(f, "no device"),
            DeviceState::Firmware => write!(f, "firmware"),
            DeviceState::Bootloader => write!(f, "bootloader"),
        }
    }
}

/// Transport-specific device identifier; empty means "any matching device".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceIdentifier(id.into())
    }

    /// Identifier meaning "first matching device"
    pub fn any() -> Self {
        DeviceIdentifier(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome indicator handed to completion handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
}

impl CommandStatus {
    pub fn is_success(self) -> bool {
        matches!(self, CommandStatus::Success)
    }
}

/// Device passphrase, wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Passphrase(passphrase.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Passphrase::new(value)
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Passphrase(value)
    }
}

// Never print the secret, not even in debug output
impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}
