//! # Configuration Module
//!
//! Handles loading, validating and saving configuration as TOML files.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::channel::{ChannelId, ChannelParams, ChannelRegistry};
use crate::error::{HydroPulseError, Result};

/// Baud rates offered for the RS-485 adapter.
pub const SUPPORTED_BAUD_RATES: &[u32] =
    &[300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Longest accepted rolling window, one day.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Poll loop configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Rolling window configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WindowConfig {
    #[serde(default = "default_window_seconds")]
    pub seconds: u64,
}

/// Device register encoding
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "default_adc_max")]
    pub adc_max: u16,
}

/// Export file format
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Jsonl,
}

/// Export configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExportConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_export_format")]
    pub format: ExportFormat,

    #[serde(default)]
    pub decimals: usize,
}

/// Diagnostic log file configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_to_file")]
    pub file: bool,

    #[serde(default = "default_log_dir")]
    pub dir: String,
}

/// One sensor channel
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChannelConfig {
    pub id: ChannelId,

    pub name: String,

    /// Defaults to `id - 1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<u16>,

    #[serde(default)]
    pub units: String,

    pub scale: f64,

    #[serde(default = "default_calibration")]
    pub calibration: f64,

    #[serde(default)]
    pub offset: f64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ChannelConfig {
    /// Register address the channel is read from.
    #[must_use]
    pub fn register_address(&self) -> u16 {
        self.register.unwrap_or_else(|| self.id.saturating_sub(1))
    }

    fn to_params(&self) -> ChannelParams {
        ChannelParams {
            register: self.register_address(),
            name: self.name.clone(),
            units: self.units.clone(),
            calibration: self.calibration,
            scale: self.scale,
            offset: self.offset,
            enabled: self.enabled,
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_slave_id() -> u8 { 1 }
fn default_timeout_ms() -> u64 { 1000 }

fn default_interval_ms() -> u64 { 100 }
fn default_retries() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 50 }

fn default_window_seconds() -> u64 { crate::buffer::DEFAULT_WINDOW_SECS }

fn default_adc_max() -> u16 { crate::channel::conversion::DEFAULT_ADC_MAX }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_export_format() -> ExportFormat { ExportFormat::Csv }
fn default_log_to_file() -> bool { true }

fn default_calibration() -> f64 { 1.0 }
fn default_enabled() -> bool { true }

fn default_channels() -> Vec<ChannelConfig> {
    ["Main Pressure", "Charge Pressure", "Flow", "RPM"]
        .iter()
        .zip(1..)
        .map(|(name, id)| ChannelConfig {
            id,
            name: name.to_string(),
            register: None,
            units: String::new(),
            scale: 600.0,
            calibration: 1.0,
            offset: 2.0,
            enabled: true,
        })
        .collect()
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            slave_id: default_slave_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { seconds: default_window_seconds() }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { adc_max: default_adc_max() }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            format: default_export_format(),
            decimals: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_to_file(),
            dir: default_log_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            polling: PollingConfig::default(),
            window: WindowConfig::default(),
            device: DeviceConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
            channels: default_channels(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hydro_pulse::config::Config;
    ///
    /// let config = Config::load("config/hydro-pulse.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns error if validation fails or the file cannot be written
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Build a channel registry from the `[[channels]]` entries
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if any channel is rejected by the registry
    pub fn registry(&self) -> Result<ChannelRegistry> {
        let mut registry = ChannelRegistry::new();
        for channel in &self.channels {
            registry.configure(channel.id, channel.to_params())?;
        }
        Ok(registry)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.is_empty() {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom(format!(
                    "baud_rate must be one of: {}",
                    SUPPORTED_BAUD_RATES.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
                ))
            ));
        }

        // Modbus unicast addresses are 1-247
        if self.serial.slave_id == 0 || self.serial.slave_id > 247 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("slave_id must be between 1 and 247")
            ));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("timeout_ms must be between 1 and 10000")
            ));
        }

        // Validate polling configuration
        if self.polling.interval_ms == 0 || self.polling.interval_ms > 60000 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("interval_ms must be between 1 and 60000")
            ));
        }

        if self.polling.retries == 0 || self.polling.retries > 10 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("retries must be between 1 and 10")
            ));
        }

        if self.polling.retry_backoff_ms > 10000 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("retry_backoff_ms must be at most 10000")
            ));
        }

        if self.window.seconds == 0 || self.window.seconds > MAX_WINDOW_SECS {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom(format!(
                    "window seconds must be between 1 and {}",
                    MAX_WINDOW_SECS
                ))
            ));
        }

        if self.device.adc_max == 0 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("adc_max must be greater than 0")
            ));
        }

        if self.export.log_dir.is_empty() {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("export log_dir cannot be empty")
            ));
        }

        if self.export.decimals > 6 {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("export decimals must be between 0 and 6")
            ));
        }

        if self.logging.file && self.logging.dir.is_empty() {
            return Err(HydroPulseError::Config(
                toml::de::Error::custom("logging dir cannot be empty when file logging is enabled")
            ));
        }

        // Channel ids are 1-based and unique
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.id == 0 {
                return Err(HydroPulseError::Config(
                    toml::de::Error::custom(format!(
                        "channel '{}' has id 0 (ids start at 1)",
                        channel.name
                    ))
                ));
            }
            if !seen.insert(channel.id) {
                return Err(HydroPulseError::Config(
                    toml::de::Error::custom(format!(
                        "channel id {} is defined more than once",
                        channel.id
                    ))
                ));
            }
        }

        // Per-channel parameters are checked by the registry
        self.registry()?;

        Ok(())
    }
}
