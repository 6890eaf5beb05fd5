//! Digital Bitbox bridge CLI
//!
//! Command-line front end over the device manager: discovery, raw JSON
//! commands, state watching, firmware upgrades and configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use dbb_bridge::infra::progress::{create_reporter, progress_callback, ProgressStyle};
use dbb_bridge::{
    connect_best_backend, ClientConfiguration, ConfigManager, DeviceManager, ExportFormat,
    FirmwareSource,
};
use miette::{IntoDiagnostic, Result};

#[derive(Parser)]
#[command(name = "dbb-cli")]
#[command(about = "Talk to a Digital Bitbox hardware wallet over USB")]
#[command(long_about = "
dbb-cli - Digital Bitbox host bridge

EXAMPLES:
    # Show whether a device is attached and in which mode
    dbb-cli find

    # Send an encrypted command (passphrase from DBB_PASSPHRASE)
    dbb-cli send '{\"device\":\"info\"}'

    # Send a plaintext command
    dbb-cli send '{\"ping\":\"\"}' --plain

    # Print attach/detach events for a minute
    dbb-cli watch --seconds 60

    # Flash a signed firmware image
    dbb-cli upgrade firmware.bin --progress bar

ENVIRONMENT VARIABLES:
    DBB_PASSPHRASE  Device passphrase for encrypted commands
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the device state and identifier
    Find,

    /// Send one JSON command and print the reply
    Send {
        /// JSON command
        #[arg(value_name = "JSON")]
        json: String,

        /// Send without encryption
        #[arg(long)]
        plain: bool,

        /// Device passphrase
        #[arg(short, long, env = "DBB_PASSPHRASE", hide_env_values = true, default_value = "")]
        passphrase: String,
    },

    /// Print device state transitions as they happen
    Watch {
        /// Stop after this many seconds (runs until interrupted otherwise)
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Flash a firmware image
    Upgrade {
        /// Firmware image
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Treat the device as a development unit (image has no signature block)
        #[arg(long)]
        development: bool,

        /// Hex signature to flash with a development image
        #[arg(long, requires = "development", value_name = "HEX")]
        signature: Option<String>,

        /// Progress indicator style
        #[arg(long, value_enum, default_value = "bar")]
        progress: ProgressStyleArg,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Export configuration
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum ProgressStyleArg {
    Percentage,
    Bar,
    Silent,
}

impl From<ProgressStyleArg> for ProgressStyle {
    fn from(arg: ProgressStyleArg) -> Self {
        match arg {
            ProgressStyleArg::Percentage => ProgressStyle::Percentage,
            ProgressStyleArg::Bar => ProgressStyle::ProgressBar,
            ProgressStyleArg::Silent => ProgressStyle::Silent,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum ExportFormatArg {
    Toml,
    Json,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new().into_diagnostic()?,
    };
    let config = config_manager.load_or_default().into_diagnostic()?;

    let default_level = if cli.verbose || config.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Find => handle_find_command(&config),
        Commands::Send {
            json,
            plain,
            passphrase,
        } => handle_send_command(&config, &json, &passphrase, !plain),
        Commands::Watch { seconds } => handle_watch_command(&config, seconds),
        Commands::Upgrade {
            file,
            development,
            signature,
            progress,
        } => handle_upgrade_command(
            &config,
            file,
            development || config.development_device,
            signature,
            progress.into(),
        ),
        Commands::Config(config_cmd) => handle_config_command(&config_manager, config_cmd),
    }
}

fn open_manager(config: &ClientConfiguration) -> Result<DeviceManager> {
    let transport = connect_best_backend(config).into_diagnostic()?;
    DeviceManager::with_config(transport, |_, _| {}, config).into_diagnostic()
}

fn handle_find_command(config: &ClientConfiguration) -> Result<()> {
    let manager = open_manager(config)?;
    let (state, identifier) = manager.find_device();
    if state.is_present() {
        println!("Device {identifier}: {state}");
    } else {
        println!("No device found");
    }
    Ok(())
}

fn handle_send_command(
    config: &ClientConfiguration,
    json: &str,
    passphrase: &str,
    encrypt: bool,
) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(json).into_diagnostic()?;

    let manager = open_manager(config)?;
    let reply = manager
        .send_synchronous_command(json, passphrase, encrypt)
        .into_diagnostic()?;
    println!("{reply}");
    Ok(())
}

fn handle_watch_command(config: &ClientConfiguration, seconds: Option<u64>) -> Result<()> {
    let transport = connect_best_backend(config).into_diagnostic()?;
    let _manager = DeviceManager::with_config(
        transport,
        |state, identifier| {
            if state.is_present() {
                println!("{identifier}: {state}");
            } else {
                println!("device removed");
            }
        },
        config,
    )
    .into_diagnostic()?;

    println!("Watching for device changes...");
    match seconds {
        Some(seconds) => std::thread::sleep(Duration::from_secs(seconds)),
        None => loop {
            std::thread::park();
        },
    }
    Ok(())
}

fn handle_upgrade_command(
    config: &ClientConfiguration,
    file: PathBuf,
    development: bool,
    signature: Option<String>,
    style: ProgressStyle,
) -> Result<()> {
    let manager = open_manager(config)?;

    let reporter = create_reporter(style);
    reporter.set_message(&format!("Flashing {}", file.display()));

    let result = manager.upgrade_firmware(
        FirmwareSource::from(file),
        progress_callback(Arc::clone(&reporter)),
        development,
        move |_buffer| signature.unwrap_or_default(),
    );

    match result {
        Ok(()) => {
            reporter.finish();
            println!("Firmware upgrade complete");
            Ok(())
        }
        Err(e) => {
            reporter.finish_with_error(&e.to_string());
            Err::<(), _>(e).into_diagnostic()
        }
    }
}

fn handle_config_command(config_manager: &ConfigManager, config_cmd: ConfigCommands) -> Result<()> {
    match config_cmd {
        ConfigCommands::Show => match config_manager.load() {
            Ok(config) => {
                println!("Current configuration:");
                println!("  Poll interval: {} ms", config.poll_interval_ms);
                println!("  IO timeout: {} s", config.io_timeout_seconds);
                println!(
                    "  USB id: {:04x}:{:04x}",
                    config.usb_vendor_id, config.usb_product_id
                );
                println!("  Development device: {}", config.development_device);
                println!("  Verbose: {}", config.verbose);
                println!(
                    "  Configuration file: {}",
                    config_manager.config_path().display()
                );
            }
            Err(_) => {
                println!("No configuration file found. Use 'config init' to create one.");
            }
        },

        ConfigCommands::Init => {
            config_manager.load_or_create_default().into_diagnostic()?;
            println!(
                "Configuration initialized: {}",
                config_manager.config_path().display()
            );
        }

        ConfigCommands::Set { key, value } => {
            config_manager
                .update_value(&key, &value)
                .into_diagnostic()?;
            println!("Configuration updated: {key} = {value}");
        }

        ConfigCommands::Export { format } => {
            let content = config_manager
                .export_config(format.into())
                .into_diagnostic()?;
            println!("{content}");
        }
    }

    Ok(())
}
