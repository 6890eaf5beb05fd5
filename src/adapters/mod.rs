//! Adapter layer modules for external system integration.
//!
//! Provides adapters for:
//! - The transport trait the device manager drives
//! - USB HID communication with the device (libusb)

pub mod hid;
pub mod transport;
