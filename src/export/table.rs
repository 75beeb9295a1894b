//! Channel metadata plus per-channel samples, as handed to exporters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::buffer::Sample;
use crate::channel::{Channel, ChannelId};

/// One exported row: a tick timestamp and one cell per channel column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: DateTime<Utc>,
    /// `None` where the channel had no reading at this tick.
    pub values: Vec<Option<f64>>,
}

/// Ordered samples per channel with the channels' metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleTable {
    /// Column order.
    pub channels: Vec<Channel>,
    pub series: BTreeMap<ChannelId, Vec<Sample>>,
}

impl SampleTable {
    #[must_use]
    pub fn new(channels: Vec<Channel>, series: BTreeMap<ChannelId, Vec<Sample>>) -> Self {
        Self { channels, series }
    }

    /// Total number of samples across channels.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Aligns the per-channel series into rows keyed by timestamp.
    ///
    /// Samples from the same poll tick share a timestamp and land in one row.
    /// A missed read leaves its cell empty rather than repeating or
    /// interpolating a neighbour.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        let width = self.channels.len();
        let mut rows: BTreeMap<DateTime<Utc>, Vec<Option<f64>>> = BTreeMap::new();

        for (column, channel) in self.channels.iter().enumerate() {
            let Some(samples) = self.series.get(&channel.id) else {
                continue;
            };
            for sample in samples {
                rows.entry(sample.timestamp).or_insert_with(|| vec![None; width])[column] =
                    Some(sample.value);
            }
        }

        rows.into_iter()
            .map(|(timestamp, values)| Row { timestamp, values })
            .collect()
    }

    /// Every sample in timestamp order, ties broken by column order.
    #[must_use]
    pub fn samples_in_order(&self) -> Vec<(&Channel, &Sample)> {
        let mut all: Vec<(&Channel, &Sample)> = self
            .channels
            .iter()
            .filter_map(|c| self.series.get(&c.id).map(|s| (c, s)))
            .flat_map(|(c, samples)| samples.iter().map(move |s| (c, s)))
            .collect();
        all.sort_by_key(|(_, s)| s.timestamp);
        all
    }
}
