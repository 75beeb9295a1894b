//! # Rolling Window Buffer
//!
//! Keeps the trailing window (5 minutes by default) of samples per channel
//! for live display.
//!
//! ## Retention
//!
//! `latest` is the timestamp of the most recent append on any channel.
//! After every append, samples older than `latest - span` are evicted from
//! the head of every channel. If the clock steps backwards, `latest` follows
//! it and samples newer than the new reading leave the window from the tail.
//! Every retained sample therefore satisfies
//! `0 <= latest - sample.timestamp <= span`.
//!
//! ## Usage
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use hydro_pulse::buffer::{RollingWindow, Sample};
//!
//! let mut window = RollingWindow::new(&[1], Duration::seconds(300));
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//!
//! window.append(Sample::new(t0, 1, 100, 14.6))?;
//! window.append(Sample::new(t0 + Duration::seconds(301), 1, 120, 17.5))?;
//!
//! // The first sample fell out of the window
//! assert_eq!(window.snapshot(1)?.len(), 1);
//! # Ok::<(), hydro_pulse::error::HydroPulseError>(())
//! ```

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use super::Sample;
use crate::channel::ChannelId;
use crate::error::{HydroPulseError, Result};

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Time-bounded per-channel sample buffer.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    span: Duration,
    per_channel: BTreeMap<ChannelId, VecDeque<Sample>>,
    latest: Option<DateTime<Utc>>,
}

impl RollingWindow {
    /// Creates an empty window for the given channels.
    #[must_use]
    pub fn new(channels: &[ChannelId], span: Duration) -> Self {
        Self {
            span,
            per_channel: channels.iter().map(|&id| (id, VecDeque::new())).collect(),
            latest: None,
        }
    }

    /// Window length.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.span
    }

    /// Newest timestamp appended so far.
    #[must_use]
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.latest
    }

    /// Appends a sample and evicts whatever fell out of the window.
    ///
    /// # Errors
    ///
    /// Returns [`HydroPulseError::UnknownChannel`] if the window was not
    /// created for the sample's channel.
    pub fn append(&mut self, sample: Sample) -> Result<()> {
        self.insert(sample)?;
        self.evict();
        Ok(())
    }

    /// Appends a whole tick worth of samples, evicting once at the end.
    ///
    /// Channels are checked up front so a bad batch leaves the buffer untouched.
    pub fn append_batch(&mut self, samples: &[Sample]) -> Result<()> {
        if let Some(unknown) = samples
            .iter()
            .find(|s| !self.per_channel.contains_key(&s.channel))
        {
            return Err(HydroPulseError::UnknownChannel(unknown.channel));
        }

        let mut ordered = samples.to_vec();
        ordered.sort_by_key(|s| s.timestamp);
        for sample in ordered {
            self.insert(sample)?;
        }
        self.evict();
        Ok(())
    }

    /// Copies the in-window samples of one channel, oldest first.
    pub fn snapshot(&self, channel: ChannelId) -> Result<Vec<Sample>> {
        self.per_channel
            .get(&channel)
            .map(|samples| samples.iter().copied().collect())
            .ok_or(HydroPulseError::UnknownChannel(channel))
    }

    /// Copies every channel's in-window samples.
    #[must_use]
    pub fn export_all(&self) -> BTreeMap<ChannelId, Vec<Sample>> {
        self.per_channel
            .iter()
            .map(|(&id, samples)| (id, samples.iter().copied().collect()))
            .collect()
    }

    /// Number of retained samples across all channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.per_channel.values().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every sample, keeping the channel set.
    pub fn clear(&mut self) {
        for samples in self.per_channel.values_mut() {
            samples.clear();
        }
        self.latest = None;
    }

    fn insert(&mut self, sample: Sample) -> Result<()> {
        if !self.per_channel.contains_key(&sample.channel) {
            return Err(HydroPulseError::UnknownChannel(sample.channel));
        }

        if self.latest.is_some_and(|latest| sample.timestamp < latest) {
            // Clock stepped back
            for samples in self.per_channel.values_mut() {
                while samples.back().is_some_and(|tail| tail.timestamp > sample.timestamp) {
                    samples.pop_back();
                }
            }
        }
        self.latest = Some(sample.timestamp);

        if let Some(samples) = self.per_channel.get_mut(&sample.channel) {
            samples.push_back(sample);
        }
        Ok(())
    }

    fn evict(&mut self) {
        let Some(cutoff) = self
            .latest
            .and_then(|latest| latest.checked_sub_signed(self.span))
        else {
            return;
        };

        for samples in self.per_channel.values_mut() {
            while samples.front().is_some_and(|head| head.timestamp < cutoff) {
                samples.pop_front();
            }
        }
    }
}
