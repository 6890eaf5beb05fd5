//! Device transport trait shared by all backends.
//!
//! The manager only talks to hardware through this interface:
//! - USB HID backend (libusb via `rusb`) - feature `direct-usb`
//! - Any in-process implementation (simulators, test doubles)

use crate::domain::types::{DeviceIdentifier, DeviceState};
use crate::infra::config::ClientConfiguration;
use crate::infra::error::DeviceResult;

// DeviceError is only used when no backend features are enabled
#[cfg(not(feature = "direct-usb"))]
use crate::infra::error::DeviceError;

/// Backend implementation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// USB HID backend using libusb.
    #[cfg(feature = "direct-usb")]
    UsbHid,
    /// Transport living in the same process (simulator or test double).
    InProcess,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "direct-usb")]
            Self::UsbHid => write!(f, "USB HID"),
            Self::InProcess => write!(f, "in-process"),
        }
    }
}

/// Physical channel to the device.
///
/// Implementations are driven from one thread at a time: the manager keeps
/// the transport behind its channel lock.
pub trait DeviceTransport: Send {
    /// Get the backend type.
    fn backend_type(&self) -> BackendType;

    /// Open the device named by `identifier`, or the first match if it is empty.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if no such device can be opened.
    fn open(&mut self, identifier: &DeviceIdentifier) -> DeviceResult<()>;

    /// Close the channel. Closing an already closed channel is a no-op.
    fn close(&mut self);

    /// Send one request on the open channel and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` on write/read failure or timeout.
    fn send_synchronous_request(&mut self, payload: &str) -> DeviceResult<String>;

    /// Probe for an attached device.
    fn find_device(&mut self) -> (DeviceState, DeviceIdentifier);

    /// Flash `firmware` through the bootloader.
    ///
    /// `firmware` is the full padded flash buffer, of which the first
    /// `firmware_size` bytes are payload. For production images
    /// `firmware_size` is the body length only: the signature block is
    /// passed separately as `signature_hex` and is not counted, so it is
    /// smaller than the source file by `FIRMWARE_SIGLEN`. `progress` receives
    /// percentages in `[0.0, 100.0]`.
    ///
    /// # Errors
    ///
    /// Returns error if the bootloader cannot be reached or rejects the image.
    fn perform_firmware_upgrade(
        &mut self,
        firmware: &[u8],
        firmware_size: usize,
        signature_hex: &str,
        progress: &mut dyn FnMut(f32),
    ) -> DeviceResult<()>;
}

/// Open the default hardware backend for this build.
///
/// # Errors
///
/// Returns error if the USB stack cannot be initialised or no backend is
/// compiled in.
pub fn connect_best_backend(
    config: &ClientConfiguration,
) -> DeviceResult<Box<dyn DeviceTransport>> {
    #[cfg(feature = "direct-usb")]
    {
        log::info!("Using USB HID backend");
        let transport = crate::adapters::hid::HidTransport::from_config(config)?;
        Ok(Box::new(transport))
    }

    #[cfg(not(feature = "direct-usb"))]
    {
        let _ = config;
        Err(DeviceError::ConfigurationError(
            "No device backend available. Enable the 'direct-usb' feature.".to_string(),
        ))
    }
}
