//! Error handling types and result definitions for the bridge.

use thiserror::Error;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Error taxonomy for everything that can go wrong between caller and device
#[derive(Error, Debug, miette::Diagnostic)]
pub enum DeviceError {
    /// Open/send/close failure reported by the transport.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Empty key material, corrupt ciphertext or bad padding.
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Firmware source missing, empty or oversized.
    #[error("Firmware file error: {0}")]
    FileError(String),

    /// Device reply could not be interpreted.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(error: std::io::Error) -> Self {
        DeviceError::IoError(error.to_string())
    }
}

impl From<base64::DecodeError> for DeviceError {
    fn from(error: base64::DecodeError) -> Self {
        DeviceError::CryptoError(format!("invalid base64 envelope: {error}"))
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(error: serde_json::Error) -> Self {
        DeviceError::ProtocolError(error.to_string())
    }
}

#[cfg(feature = "direct-usb")]
impl From<rusb::Error> for DeviceError {
    fn from(error: rusb::Error) -> Self {
        DeviceError::ConnectionError(error.to_string())
    }
}
