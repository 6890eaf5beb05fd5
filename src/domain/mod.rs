pub mod constants;
pub mod crypto; // envelope encryption for device commands
pub mod firmware;
pub mod types;
