//! USB HID transport for direct device communication.
//!
//! Talks to the device over its HID interface's interrupt endpoints through
//! libusb, so no OS HID driver or hidapi is needed.
//!
//! # Bootloader protocol
//!
//! Firmware is flashed with three kinds of framed binary commands:
//!
//! ```text
//! "e"                          erase the application area
//! "w" | chunk_index | 4096 B   write one chunk
//! "s0" | signature_hex         verify signatures and commit
//! ```
//!
//! Every reply echoes the command byte followed by `'0'` on success.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};

use super::frame::{encode_frames, FrameDecoder, HID_REPORT_SIZE, HWW_CMD};
use crate::adapters::transport::{BackendType, DeviceTransport};
use crate::domain::constants::FIRMWARE_CHUNKSIZE;
use crate::domain::types::{DeviceIdentifier, DeviceState};
use crate::infra::config::ClientConfiguration;
use crate::infra::error::{DeviceError, DeviceResult};

/// USB interface class for HID.
const HID_CLASS: u8 = 0x03;

/// Serial-number prefix the bootloader reports.
const BOOTLOADER_SERIAL_PREFIX: &str = "dbb.bl";

/// Reply marker for a successful bootloader command.
const BOOTLOADER_OK: u8 = b'0';

/// Opened and claimed HID interface.
struct OpenChannel {
    handle: DeviceHandle<Context>,
    interface_number: u8,
    endpoint_in: u8,
    endpoint_out: u8,
}

/// Direct USB HID transport.
pub struct HidTransport {
    context: Context,
    vendor_id: u16,
    product_id: u16,
    io_timeout: Duration,
    channel: Option<OpenChannel>,
}

impl HidTransport {
    /// Create a transport for the given USB ids.
    ///
    /// # Errors
    ///
    /// Returns error if the libusb context cannot be created.
    pub fn new(vendor_id: u16, product_id: u16, io_timeout: Duration) -> DeviceResult<Self> {
        let context = Context::new().map_err(|e| {
            DeviceError::ConnectionError(format!("Failed to create USB context: {e}"))
        })?;
        Ok(Self {
            context,
            vendor_id,
            product_id,
            io_timeout,
            channel: None,
        })
    }

    /// Create a transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the libusb context cannot be created.
    pub fn from_config(config: &ClientConfiguration) -> DeviceResult<Self> {
        Self::new(
            config.usb_vendor_id,
            config.usb_product_id,
            config.io_timeout(),
        )
    }

    fn identifier_of(device: &Device<Context>) -> DeviceIdentifier {
        DeviceIdentifier::new(format!("{}:{}", device.bus_number(), device.address()))
    }

    /// First matching device, or the one named by `identifier`.
    fn locate(&self, identifier: &DeviceIdentifier) -> DeviceResult<Option<Device<Context>>> {
        let devices = self.context.devices().map_err(|e| {
            DeviceError::ConnectionError(format!("Failed to enumerate USB devices: {e}"))
        })?;

        for device in devices.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() != self.vendor_id || desc.product_id() != self.product_id {
                continue;
            }
            if identifier.is_empty() || Self::identifier_of(&device) == *identifier {
                return Ok(Some(device));
            }
        }
        Ok(None)
    }

    fn state_of(device: &Device<Context>) -> DeviceState {
        let serial = device.device_descriptor().ok().and_then(|desc| {
            let handle = device.open().ok()?;
            handle.read_serial_number_string_ascii(&desc).ok()
        });
        match serial {
            Some(s) if s.starts_with(BOOTLOADER_SERIAL_PREFIX) => DeviceState::Bootloader,
            Some(_) => DeviceState::Firmware,
            None => {
                log::debug!("Serial number unreadable, assuming application firmware");
                DeviceState::Firmware
            }
        }
    }

    fn claim(device: &Device<Context>) -> DeviceResult<OpenChannel> {
        let config = device.active_config_descriptor().map_err(|e| {
            DeviceError::ConnectionError(format!("Failed to get config descriptor: {e}"))
        })?;

        for interface in config.interfaces() {
            for desc in interface.descriptors() {
                if desc.class_code() != HID_CLASS {
                    continue;
                }
                let interface_number = desc.interface_number();

                let mut endpoint_in = None;
                let mut endpoint_out = None;
                for endpoint in desc.endpoint_descriptors() {
                    if endpoint.transfer_type() == rusb::TransferType::Interrupt {
                        if endpoint.direction() == rusb::Direction::In {
                            endpoint_in = Some(endpoint.address());
                        } else {
                            endpoint_out = Some(endpoint.address());
                        }
                    }
                }

                let (Some(ep_in), Some(ep_out)) = (endpoint_in, endpoint_out) else {
                    continue;
                };
                log::debug!(
                    "HID interface {interface_number} found: IN=0x{ep_in:02x} OUT=0x{ep_out:02x}"
                );

                let handle = device.open().map_err(|e| {
                    DeviceError::ConnectionError(format!("Failed to open USB device: {e}"))
                })?;

                #[cfg(target_os = "linux")]
                {
                    if handle
                        .kernel_driver_active(interface_number)
                        .unwrap_or(false)
                    {
                        handle.detach_kernel_driver(interface_number).map_err(|e| {
                            DeviceError::ConnectionError(format!(
                                "Failed to detach kernel driver: {e}"
                            ))
                        })?;
                    }
                }

                handle.claim_interface(interface_number).map_err(|e| {
                    DeviceError::ConnectionError(format!("Failed to claim USB interface: {e}"))
                })?;

                return Ok(OpenChannel {
                    handle,
                    interface_number,
                    endpoint_in: ep_in,
                    endpoint_out: ep_out,
                });
            }
        }

        Err(DeviceError::ConnectionError(
            "Device has no HID interface with interrupt endpoints".to_string(),
        ))
    }

    /// Frame `payload`, send it and read back one complete message.
    fn exchange(&self, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        let timeout = self.io_timeout;
        let channel = self.channel.as_ref().ok_or_else(|| {
            DeviceError::ConnectionError("Channel is not open".to_string())
        })?;

        for report in encode_frames(HWW_CMD, payload)? {
            log::trace!("HID TX: {:02x?}", &report[..]);
            let written = channel
                .handle
                .write_interrupt(channel.endpoint_out, &report, timeout)
                .map_err(|e| DeviceError::ConnectionError(format!("USB write failed: {e}")))?;
            if written != HID_REPORT_SIZE {
                return Err(DeviceError::ConnectionError(format!(
                    "Incomplete USB write: {written}/{HID_REPORT_SIZE} bytes"
                )));
            }
        }

        let mut decoder = FrameDecoder::new();
        let mut report = [0u8; HID_REPORT_SIZE];
        loop {
            let read = channel
                .handle
                .read_interrupt(channel.endpoint_in, &mut report, timeout)
                .map_err(|e| DeviceError::ConnectionError(format!("USB read failed: {e}")))?;
            log::trace!("HID RX: {:02x?}", &report[..read]);
            if let Some(message) = decoder.push(&report[..read])? {
                return Ok(message);
            }
        }
    }

    /// Run one bootloader command and check its acknowledgement.
    fn bootloader_command(&self, command: &[u8]) -> DeviceResult<()> {
        let reply = self.exchange(command)?;
        match reply.as_slice() {
            [echo, BOOTLOADER_OK, ..] if *echo == command[0] => Ok(()),
            _ => Err(DeviceError::ProtocolError(format!(
                "Bootloader rejected '{}' command: {}",
                command[0] as char,
                String::from_utf8_lossy(&reply)
            ))),
        }
    }

    fn flash(
        &mut self,
        firmware: &[u8],
        firmware_size: usize,
        signature_hex: &str,
        progress: &mut dyn FnMut(f32),
    ) -> DeviceResult<()> {
        progress(0.0);
        self.bootloader_command(b"e")?;

        let chunks = firmware_size.div_ceil(FIRMWARE_CHUNKSIZE);
        for index in 0..chunks {
            let start = index * FIRMWARE_CHUNKSIZE;
            let end = (start + FIRMWARE_CHUNKSIZE).min(firmware.len());
            let chunk_index = u8::try_from(index).map_err(|_| {
                DeviceError::InvalidInput(format!("firmware needs {chunks} chunks, at most 256 fit"))
            })?;

            let mut command = Vec::with_capacity(2 + FIRMWARE_CHUNKSIZE);
            command.push(b'w');
            command.push(chunk_index);
            command.extend_from_slice(&firmware[start..end]);
            self.bootloader_command(&command)?;

            progress((index + 1) as f32 / chunks as f32 * 100.0);
        }

        let mut verify = Vec::with_capacity(2 + signature_hex.len());
        verify.extend_from_slice(b"s0");
        verify.extend_from_slice(signature_hex.as_bytes());
        self.bootloader_command(&verify)
    }
}

impl DeviceTransport for HidTransport {
    fn backend_type(&self) -> BackendType {
        BackendType::UsbHid
    }

    fn open(&mut self, identifier: &DeviceIdentifier) -> DeviceResult<()> {
        self.close();
        let device = self.locate(identifier)?.ok_or_else(|| {
            DeviceError::ConnectionError(format!(
                "No device {:04x}:{:04x} found",
                self.vendor_id, self.product_id
            ))
        })?;
        self.channel = Some(Self::claim(&device)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.handle.release_interface(channel.interface_number);
        }
    }

    fn send_synchronous_request(&mut self, payload: &str) -> DeviceResult<String> {
        let reply = self.exchange(payload.as_bytes())?;
        let text = String::from_utf8(reply).map_err(|_| {
            DeviceError::ProtocolError("Device reply is not valid UTF-8".to_string())
        })?;
        Ok(text.trim_end_matches('\0').to_string())
    }

    fn find_device(&mut self) -> (DeviceState, DeviceIdentifier) {
        match self.locate(&DeviceIdentifier::any()) {
            Ok(Some(device)) => (Self::state_of(&device), Self::identifier_of(&device)),
            Ok(None) => (DeviceState::NoDevice, DeviceIdentifier::any()),
            Err(e) => {
                log::debug!("Device enumeration failed: {e}");
                (DeviceState::NoDevice, DeviceIdentifier::any())
            }
        }
    }

    fn perform_firmware_upgrade(
        &mut self,
        firmware: &[u8],
        firmware_size: usize,
        signature_hex: &str,
        progress: &mut dyn FnMut(f32),
    ) -> DeviceResult<()> {
        self.open(&DeviceIdentifier::any())?;
        let result = self.flash(firmware, firmware_size, signature_hex, progress);
        self.close();
        result
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        self.close();
    }
}
