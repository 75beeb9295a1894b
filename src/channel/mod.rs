//! # Channel Module
//!
//! Sensor channel definitions.
//!
//! This module handles:
//! - Per-channel register address, name, units and calibration parameters
//! - Validation of channel parameters at configuration time
//! - Conversion of raw register counts into physical units

pub mod conversion;
pub mod registry;

pub use conversion::{calibrated_value, RegisterEncoding};
pub use registry::{Channel, ChannelParams, ChannelRegistry};

/// 1-based channel number as shown to the operator.
pub type ChannelId = u16;
