//! # Session Context
//!
//! Everything that belongs to one Start-to-Stop run: the channel snapshot
//! taken at start, the rolling window and the session log.
//!
//! The poll task is the only writer. Readers (plot redraw, statistics,
//! exports) take a read lock and copy, so they see either all of a tick's
//! samples or none of them.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::buffer::{ChannelStats, RollingWindow, Sample, SessionLog};
use crate::channel::{Channel, ChannelId};
use crate::error::Result;
use crate::export::SampleTable;

/// Lifecycle of the acquisition controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped(StopReason),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stop command
    Requested,
    /// The transport reported the device gone
    DeviceLost(String),
    /// Internal failure (e.g. buffers out of step with the channel set)
    Failed(String),
}

/// Buffers and channel snapshot of one session.
#[derive(Debug)]
pub struct SessionContext {
    started_at: DateTime<Utc>,
    channels: Vec<Channel>,
    window: RwLock<RollingWindow>,
    log: RwLock<SessionLog>,
}

impl SessionContext {
    /// Creates empty buffers for `channels`, polled in the given order.
    #[must_use]
    pub fn new(channels: Vec<Channel>, window_span: Duration, started_at: DateTime<Utc>) -> Self {
        let ids: Vec<ChannelId> = channels.iter().map(|c| c.id).collect();
        Self {
            started_at,
            window: RwLock::new(RollingWindow::new(&ids, window_span)),
            log: RwLock::new(SessionLog::new(&ids)),
            channels,
        }
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Channels polled in this session, in poll order.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    #[must_use]
    pub fn has_channel(&self, id: ChannelId) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }

    /// Appends one tick's samples to both buffers.
    pub fn record(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.window
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append_batch(samples)?;
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append_batch(samples)?;
        Ok(())
    }

    /// Copy of one channel's in-window samples.
    pub fn snapshot(&self, channel: ChannelId) -> Result<Vec<Sample>> {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(channel)
    }

    /// Copy of every channel's in-window samples, taken under one lock.
    #[must_use]
    pub fn snapshot_all(&self) -> BTreeMap<ChannelId, Vec<Sample>> {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .export_all()
    }

    /// Window statistics for one channel, `None` while it has no samples.
    pub fn statistics(&self, channel: ChannelId) -> Result<Option<ChannelStats>> {
        Ok(ChannelStats::from_samples(&self.snapshot(channel)?))
    }

    /// Full session history of one channel.
    pub fn history(&self, channel: ChannelId) -> Result<Vec<Sample>> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history(channel)
            .map(<[Sample]>::to_vec)
    }

    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn session_len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Window contents ready for export.
    #[must_use]
    pub fn window_table(&self) -> SampleTable {
        SampleTable::new(self.channels.clone(), self.snapshot_all())
    }

    /// Session contents ready for export.
    #[must_use]
    pub fn session_table(&self) -> SampleTable {
        let series = self
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .export_all();
        SampleTable::new(self.channels.clone(), series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelParams, ChannelRegistry};
    use crate::error::HydroPulseError;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn context() -> SessionContext {
        let mut registry = ChannelRegistry::new();
        registry.configure(1, ChannelParams::new(0, "Main Pressure", 600.0)).unwrap();
        registry.configure(2, ChannelParams::new(1, "Flow", 600.0)).unwrap();
        SessionContext::new(registry.channels().cloned().collect(), Duration::seconds(300), t(0))
    }

    fn tick(secs: i64) -> Vec<Sample> {
        vec![Sample::new(t(secs), 1, 1, 1.0), Sample::new(t(secs), 2, 2, 2.0)]
    }

    #[test]
    fn test_record_feeds_both_buffers() {
        let ctx = context();
        for secs in [0, 200, 400] {
            ctx.record(&tick(secs)).unwrap();
        }
        assert_eq!(ctx.session_len(), 6);
        // t=0 aged out of the window
        assert_eq!(ctx.window_len(), 4);
        assert_eq!(ctx.snapshot(1).unwrap().len(), 2);
        assert_eq!(ctx.history(1).unwrap().len(), 3);
    }

    #[test]
    fn test_record_empty_tick_is_noop() {
        let ctx = context();
        ctx.record(&[]).unwrap();
        assert_eq!(ctx.session_len(), 0);
    }

    #[test]
    fn test_unknown_channel() {
        let ctx = context();
        assert!(!ctx.has_channel(3));
        assert!(matches!(ctx.snapshot(3), Err(HydroPulseError::UnknownChannel(3))));
        assert!(ctx.record(&[Sample::new(t(0), 3, 0, 0.0)]).is_err());
    }

    #[test]
    fn test_statistics() {
        let ctx = context();
        assert_eq!(ctx.statistics(1).unwrap(), None);
        ctx.record(&tick(0)).unwrap();
        let stats = ctx.statistics(2).unwrap().unwrap();
        assert_eq!(stats.current, 2.0);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn test_tables_carry_channel_metadata() {
        let ctx = context();
        ctx.record(&tick(0)).unwrap();
        ctx.record(&tick(400)).unwrap();

        let window = ctx.window_table();
        let session = ctx.session_table();
        assert_eq!(window.channels.len(), 2);
        assert_eq!(window.sample_count(), 2);
        assert_eq!(session.sample_count(), 4);
        assert_eq!(session.channels[0].name, "Main Pressure");
    }

    #[test]
    fn test_concurrent_snapshots_never_see_partial_ticks() {
        let ctx = Arc::new(context());

        let writer = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for secs in 0..2000 {
                    ctx.record(&tick(secs)).unwrap();
                }
            })
        };

        let reader = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for _ in 0..2000 {
                    let all = ctx.snapshot_all();
                    let a: Vec<DateTime<Utc>> = all[&1].iter().map(|s| s.timestamp).collect();
                    let b: Vec<DateTime<Utc>> = all[&2].iter().map(|s| s.timestamp).collect();

                    // Every tick appends to both channels and evicts both
                    assert_eq!(a, b);
                    assert!(a.windows(2).all(|w| w[0] < w[1]));
                    if let (Some(first), Some(last)) = (a.first(), a.last()) {
                        assert!(*last - *first <= Duration::seconds(300));
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(ctx.session_len(), 4000);
        assert_eq!(ctx.snapshot(1).unwrap().len(), 301);
    }
}
