//! Service layer module root.
//! Contains the device manager and the queueing it builds on.

pub mod command_queue;
pub mod device_manager;
pub mod pending;

pub use command_queue::CommandQueue;
pub use device_manager::{DeviceManager, StateCallback};
pub use pending::{CommandOutcome, PendingResponse};
