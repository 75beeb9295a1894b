//! # Error Types
//!
//! Custom error types for HydroPulse using `thiserror`.

use thiserror::Error;

use crate::channel::ChannelId;
use crate::serial::TransportError;

/// Main error type for HydroPulse
#[derive(Debug, Error)]
pub enum HydroPulseError {
    /// Channel parameters rejected at configuration time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Channel id not present in the registry or buffers
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// Start requested with every channel disabled
    #[error("No channels configured for polling")]
    NoChannelsConfigured,

    /// Start requested while a session is running
    #[error("A session is already running")]
    SessionAlreadyRunning,

    /// Stop requested with no session to stop
    #[error("No session is running")]
    SessionNotRunning,

    /// Modbus transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device went away mid-session
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be written back
    #[error("Configuration encoding error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// CSV export errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON export errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task panicked or was aborted
    #[error("Session task failed: {0}")]
    Task(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for HydroPulse
pub type Result<T> = std::result::Result<T, HydroPulseError>;
