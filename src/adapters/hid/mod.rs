//! USB HID backend.
//!
//! This module provides direct device communication via libusb, without
//! requiring an OS HID driver.
//!
//! # Architecture
//!
//! - `frame`: 64-byte report framing (init and continuation frames)
//! - `transport`: USB enumeration, interface claiming and the bootloader
//!   flashing sequence

pub mod frame;
#[cfg(feature = "direct-usb")]
mod transport;

#[cfg(feature = "direct-usb")]
pub use transport::HidTransport;
