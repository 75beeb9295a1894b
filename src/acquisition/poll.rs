//! # Poll Loop
//!
//! Reads every enabled channel once per tick, converts the raw counts and
//! appends the tick to the session buffers.
//!
//! ## Failure handling
//!
//! | Error                         | Action                                    |
//! |-------------------------------|-------------------------------------------|
//! | `Timeout`, `Crc`, `Exception` | retry with backoff, then leave a gap      |
//! | `Disconnected`                | record the partial tick, stop the session |
//!
//! Cancellation is observed between ticks only, so a tick that has started
//! always finishes and is recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::session::{SessionContext, StopReason};
use super::AcquisitionSettings;
use crate::buffer::Sample;
use crate::channel::{Channel, ChannelId};
use crate::error::Result;
use crate::serial::{RegisterTransport, TransportError};

/// Number of ticks between status log messages (one minute at 10 Hz)
const LOG_INTERVAL_TICKS: u64 = 600;

/// How often a failed read is attempted before the channel is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per read, including the first
    pub attempts: u32,
    /// Delay after the first failure, doubled after each further one
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_before_retry(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    /// Samples recorded
    pub samples: usize,
    /// Channels left without a sample after exhausting retries
    pub missed: Vec<ChannelId>,
    /// Set when the transport reported a disconnect; later channels were
    /// not read
    pub lost: Option<String>,
}

/// Totals for a finished poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSummary {
    pub ticks: u64,
    pub samples: u64,
    pub missed: u64,
    pub stop_reason: StopReason,
}

/// Reads one channel's register, retrying transient failures.
///
/// Returns the last error once the policy is exhausted, or immediately for
/// a fatal error.
pub async fn read_with_retry(
    transport: &mut dyn RegisterTransport,
    policy: &RetryPolicy,
    channel: &Channel,
) -> std::result::Result<u16, TransportError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match transport.read_register(channel.register).await {
            Ok(raw) => return Ok(raw),
            Err(e) if e.is_fatal() || attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_before_retry(attempt);
                debug!(
                    "Channel {} read attempt {}/{} failed: {}, retrying in {:?}",
                    channel.id, attempt, attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Drives one session's reads.
pub struct PollLoop {
    transport: Box<dyn RegisterTransport>,
    context: Arc<SessionContext>,
    settings: AcquisitionSettings,
    clock: Arc<dyn Clock>,
}

impl PollLoop {
    #[must_use]
    pub fn new(
        transport: Box<dyn RegisterTransport>,
        context: Arc<SessionContext>,
        settings: AcquisitionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            context,
            settings,
            clock,
        }
    }

    /// Runs a single tick over the session's channels.
    ///
    /// All samples of the tick share one timestamp, taken once the reads
    /// are done, and are appended under a single lock per buffer. A
    /// disconnect ends the tick early and is reported in
    /// [`TickReport::lost`]; samples read before it are still recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the session buffers reject the tick.
    pub async fn poll_once(&mut self) -> Result<TickReport> {
        let mut reads: Vec<(&Channel, u16)> = Vec::with_capacity(self.context.channels().len());
        let mut missed = Vec::new();
        let mut lost = None;

        for channel in self.context.channels() {
            match read_with_retry(self.transport.as_mut(), &self.settings.retry, channel).await {
                Ok(raw) => reads.push((channel, raw)),
                Err(TransportError::Disconnected(reason)) => {
                    lost = Some(reason);
                    break;
                }
                Err(e) => {
                    warn!("Channel {} ({}) skipped this tick: {}", channel.id, channel.name, e);
                    missed.push(channel.id);
                }
            }
        }

        let timestamp = self.clock.now();
        let samples: Vec<Sample> = reads
            .into_iter()
            .map(|(channel, raw)| {
                let value = channel.convert(raw, &self.settings.encoding);
                Sample::new(timestamp, channel.id, raw, value)
            })
            .collect();

        self.context.record(&samples)?;

        Ok(TickReport {
            timestamp,
            samples: samples.len(),
            missed,
            lost,
        })
    }

    /// Polls at the configured interval until `cancel` fires or the device
    /// is lost, then closes the transport.
    pub async fn run(mut self, cancel: CancellationToken) -> PollSummary {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Polling {} channels every {:?}",
            self.context.channels().len(),
            self.settings.interval
        );

        let mut ticks: u64 = 0;
        let mut samples: u64 = 0;
        let mut missed: u64 = 0;
        let mut last_log_ticks: u64 = 0;

        let stop_reason = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break StopReason::Requested;
                }

                _ = ticker.tick() => {
                    ticks += 1;
                    match self.poll_once().await {
                        Ok(report) => {
                            samples += report.samples as u64;
                            missed += report.missed.len() as u64;
                            if let Some(reason) = report.lost {
                                warn!("Device lost: {}", reason);
                                break StopReason::DeviceLost(reason);
                            }
                        }
                        Err(e) => {
                            warn!("Poll loop failed: {}", e);
                            break StopReason::Failed(e.to_string());
                        }
                    }

                    if ticks - last_log_ticks >= LOG_INTERVAL_TICKS {
                        info!(
                            "Polled {} ticks ({} samples, {} missed reads)",
                            ticks, samples, missed
                        );
                        last_log_ticks = ticks;
                    }
                }
            }
        };

        if let Err(e) = self.transport.disconnect().await {
            debug!("Transport disconnect failed: {}", e);
        }

        // Partial ticks before a device loss still count their samples
        let samples = self.context.session_len() as u64;

        info!(
            "Poll loop stopped after {} ticks: {:?}",
            ticks, stop_reason
        );

        PollSummary {
            ticks,
            samples,
            missed,
            stop_reason,
        }
    }
}
