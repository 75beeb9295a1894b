//! # Session Buffer
//!
//! Unbounded per-channel history of one Start-to-Stop run, kept for the
//! full-session export. Append-only; a new session gets a new buffer.

use std::collections::BTreeMap;

use super::Sample;
use crate::channel::ChannelId;
use crate::error::{HydroPulseError, Result};

/// Append-only per-channel sample log.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    per_channel: BTreeMap<ChannelId, Vec<Sample>>,
}

impl SessionLog {
    /// Creates an empty log for the given channels.
    #[must_use]
    pub fn new(channels: &[ChannelId]) -> Self {
        Self {
            per_channel: channels.iter().map(|&id| (id, Vec::new())).collect(),
        }
    }

    /// Appends a sample to the tail of its channel.
    ///
    /// # Errors
    ///
    /// Returns [`HydroPulseError::UnknownChannel`] if the log was not
    /// created for the sample's channel.
    pub fn append(&mut self, sample: Sample) -> Result<()> {
        self.per_channel
            .get_mut(&sample.channel)
            .ok_or(HydroPulseError::UnknownChannel(sample.channel))?
            .push(sample);
        Ok(())
    }

    /// Appends a whole tick; nothing is written if any channel is unknown.
    pub fn append_batch(&mut self, samples: &[Sample]) -> Result<()> {
        if let Some(unknown) = samples
            .iter()
            .find(|s| !self.per_channel.contains_key(&s.channel))
        {
            return Err(HydroPulseError::UnknownChannel(unknown.channel));
        }
        for sample in samples {
            self.append(*sample)?;
        }
        Ok(())
    }

    /// Full history of one channel, oldest first.
    pub fn history(&self, channel: ChannelId) -> Result<&[Sample]> {
        self.per_channel
            .get(&channel)
            .map(Vec::as_slice)
            .ok_or(HydroPulseError::UnknownChannel(channel))
    }

    /// Copies the full ordered history of every channel.
    #[must_use]
    pub fn export_all(&self) -> BTreeMap<ChannelId, Vec<Sample>> {
        self.per_channel.clone()
    }

    /// Number of samples across all channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.per_channel.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
