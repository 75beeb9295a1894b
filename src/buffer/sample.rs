//! Timestamped channel readings.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::ChannelId;

/// One successful reading of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Time of the poll tick that produced the reading.
    pub timestamp: DateTime<Utc>,
    /// Channel the reading belongs to.
    pub channel: ChannelId,
    /// Register count as returned by the device.
    pub raw: u16,
    /// Calibrated value in the channel's physical units.
    pub value: f64,
}

impl Sample {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, channel: ChannelId, raw: u16, value: f64) -> Self {
        Self {
            timestamp,
            channel,
            raw,
            value,
        }
    }
}
