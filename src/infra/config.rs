//! Configuration management infrastructure.
//!
//! This module provides configuration file support for the bridge: poll
//! cadence, USB transfer timeouts, the USB ids to match and whether the
//! attached device is a development unit.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::constants::{
    DBB_PRODUCT_ID, DBB_VENDOR_ID, DEFAULT_IO_TIMEOUT, FIND_DEVICE_POLL_INTERVAL,
};
use crate::infra::error::{DeviceError, DeviceResult};

/// Client configuration with all device preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfiguration {
    /// Interval between presence polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound on a single USB transfer, in seconds
    pub io_timeout_seconds: u64,

    /// USB vendor id to match
    pub usb_vendor_id: u16,

    /// USB product id to match
    pub usb_product_id: u16,

    /// Treat the device as a development unit (unsigned firmware)
    pub development_device: bool,

    /// Whether to show verbose output
    pub verbose: bool,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            poll_interval_ms: FIND_DEVICE_POLL_INTERVAL.as_millis() as u64,
            io_timeout_seconds: DEFAULT_IO_TIMEOUT.as_secs(),
            usb_vendor_id: DBB_VENDOR_ID,
            usb_product_id: DBB_PRODUCT_ID,
            development_device: false,
            verbose: false,
        }
    }
}

impl ClientConfiguration {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }
}

/// Configuration export formats
#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    Toml,
    Json,
}

/// Configuration manager for handling config files
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> DeviceResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> DeviceResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("dbb-bridge").join("config.toml"))
        } else {
            Ok(PathBuf::from("dbb-bridge-config.toml"))
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create_default(&self) -> DeviceResult<ClientConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "Configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = ClientConfiguration::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load configuration from file, falling back to defaults if it doesn't exist
    pub fn load_or_default(&self) -> DeviceResult<ClientConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            Ok(ClientConfiguration::default())
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> DeviceResult<ClientConfiguration> {
        log::debug!("Loading configuration from: {}", self.config_path.display());

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            DeviceError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config: ClientConfiguration = toml::from_str(&content).map_err(|e| {
            DeviceError::ConfigurationError(format!("Failed to parse config file: {e}"))
        })?;

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &ClientConfiguration) -> DeviceResult<()> {
        Self::validate_config(config)?;
        log::info!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DeviceError::ConfigurationError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            DeviceError::ConfigurationError(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            DeviceError::ConfigurationError(format!(
                "Failed to write config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate_config(config: &ClientConfiguration) -> DeviceResult<()> {
        if config.poll_interval_ms == 0 {
            return Err(DeviceError::ConfigurationError(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if config.io_timeout_seconds == 0 {
            return Err(DeviceError::ConfigurationError(
                "IO timeout must be greater than 0".to_string(),
            ));
        }

        if config.usb_vendor_id == 0 || config.usb_product_id == 0 {
            return Err(DeviceError::ConfigurationError(
                "USB vendor and product ids must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Update a specific configuration value
    pub fn update_value(&self, key: &str, value: &str) -> DeviceResult<()> {
        let mut config = self.load_or_default()?;

        match key {
            "poll_interval_ms" => config.poll_interval_ms = parse_number(key, value)?,
            "io_timeout_seconds" => config.io_timeout_seconds = parse_number(key, value)?,
            "usb_vendor_id" => config.usb_vendor_id = parse_usb_id(value)?,
            "usb_product_id" => config.usb_product_id = parse_usb_id(value)?,
            "development_device" => config.development_device = parse_bool(value)?,
            "verbose" => config.verbose = parse_bool(value)?,
            _ => {
                return Err(DeviceError::ConfigurationError(format!(
                    "Unknown configuration key: {key}"
                )));
            }
        }

        self.save(&config)
    }

    /// Get the configuration file path
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Export configuration as a portable format
    pub fn export_config(&self, format: ExportFormat) -> DeviceResult<String> {
        let config = self.load_or_default()?;

        match format {
            ExportFormat::Toml => toml::to_string_pretty(&config)
                .map_err(|e| DeviceError::ConfigurationError(format!("TOML export failed: {e}"))),
            ExportFormat::Json => serde_json::to_string_pretty(&config)
                .map_err(|e| DeviceError::ConfigurationError(format!("JSON export failed: {e}"))),
        }
    }
}

fn parse_number(key: &str, value: &str) -> DeviceResult<u64> {
    value.parse().map_err(|_| {
        DeviceError::ConfigurationError(format!("Invalid number for {key}: {value}"))
    })
}

fn parse_bool(value: &str) -> DeviceResult<bool> {
    value
        .parse()
        .map_err(|_| DeviceError::ConfigurationError(format!("Invalid boolean value: {value}")))
}

/// Parse a USB id supporting hex (0x03eb) and decimal (1003) formats
fn parse_usb_id(value: &str) -> DeviceResult<u16> {
    let parsed = if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u16::from_str_radix(hex, 16)
    } else {
        value.parse::<u16>()
    };
    parsed.map_err(|_| DeviceError::ConfigurationError(format!("Invalid USB id: {value}")))
}
