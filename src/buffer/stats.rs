//! Summary statistics over a channel's window, as shown next to the plot.

use super::Sample;

/// Current, min, max and mean of a sequence of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl ChannelStats {
    /// Computes statistics, or `None` for an empty slice.
    ///
    /// Missed reads never enter the buffers, so gaps do not skew the mean.
    #[must_use]
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        let current = samples.last()?.value;

        let (min, max, sum) = samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), s| (min.min(s.value), max.max(s.value), sum + s.value),
        );

        Some(Self {
            current,
            min,
            max,
            mean: sum / samples.len() as f64,
            count: samples.len(),
        })
    }
}
