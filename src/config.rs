//! Session settings
//!
//! Settings come from three layers, lowest precedence first:
//! - built-in defaults (8N1 at 115200 baud on the platform's usual port)
//! - a TOML file, given with `--config` or found as `voltage-compare.toml`
//!   in the working directory
//! - command-line flags, applied by the caller

use crate::serial::{PortConfig, ReaderOptions};
use serde::Deserialize;
use serialport::{DataBits, Parity, StopBits};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Settings file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "voltage-compare.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported data bits: {0} (expected 5-8)")]
    DataBits(u8),

    #[error("unsupported parity: {0:?} (expected none, odd or even)")]
    Parity(String),

    #[error("unsupported stop bits: {0} (expected 1 or 2)")]
    StopBits(u8),

    #[error("baud rate must be greater than zero")]
    BaudRate,
}

/// Serial line and polling settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSettings {
    /// Port name, e.g. COM3 or /dev/ttyUSB0
    pub port: String,
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Parity ("none", "odd", "even")
    pub parity: String,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Timeout for a single blocking read
    pub read_timeout_ms: u64,
    /// Sleep between polls of an empty receive buffer
    pub poll_interval_ms: u64,
    /// Give up on a reading after this many seconds (unset waits forever)
    pub acquire_timeout_secs: Option<u64>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        let port = PortConfig::default();
        let reader = ReaderOptions::default();
        Self {
            port: port.port_path,
            baud_rate: port.baud_rate,
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
            read_timeout_ms: port.timeout.as_millis() as u64,
            poll_interval_ms: reader.poll_interval.as_millis() as u64,
            acquire_timeout_secs: None,
        }
    }
}

/// Where results are written
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    /// CSV file to write instead of a timestamped one
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub serial: SerialSettings,
    pub output: OutputSettings,
}

impl Settings {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists, or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a TOML settings file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Serial port configuration, validating the textual line settings
    pub fn port_config(&self) -> Result<PortConfig, ConfigError> {
        let serial = &self.serial;

        if serial.baud_rate == 0 {
            return Err(ConfigError::BaudRate);
        }

        Ok(PortConfig {
            data_bits: parse_data_bits(serial.data_bits)?,
            parity: parse_parity(&serial.parity)?,
            stop_bits: parse_stop_bits(serial.stop_bits)?,
            ..PortConfig::new(&serial.port)
                .with_baud_rate(serial.baud_rate)
                .with_timeout(Duration::from_millis(serial.read_timeout_ms))
        })
    }

    /// Polling behaviour for the reader
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            poll_interval: Duration::from_millis(self.serial.poll_interval_ms),
            acquire_timeout: self.serial.acquire_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn parse_data_bits(bits: u8) -> Result<DataBits, ConfigError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(ConfigError::DataBits(other)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, ConfigError> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(ConfigError::Parity(parity.to_string())),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, ConfigError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(ConfigError::StopBits(other)),
    }
}
