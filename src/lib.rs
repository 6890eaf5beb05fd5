//! Digital Bitbox bridge library
//!
//! Host-side client for the Digital Bitbox hardware wallet: device
//! discovery, encrypted JSON commands (synchronous or queued) and firmware
//! upgrades over USB HID.
//!
//! ```no_run
//! use dbb_bridge::DeviceManager;
//!
//! # fn main() -> dbb_bridge::DeviceResult<()> {
//! let manager = DeviceManager::connect_default(|state, id| {
//!     println!("device {id} is now {state}");
//! })?;
//! let reply = manager.send_synchronous_command("{\"ping\":\"\"}", "", false)?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod services;

pub use adapters::transport::{connect_best_backend, BackendType, DeviceTransport};
pub use domain::firmware::{FirmwareLayout, FirmwareSource};
pub use domain::types::{CommandStatus, DeviceIdentifier, DeviceState, Passphrase};
pub use infra::config::{ClientConfiguration, ConfigManager, ExportFormat};
pub use infra::error::{DeviceError, DeviceResult};
pub use services::{CommandOutcome, DeviceManager, PendingResponse};
