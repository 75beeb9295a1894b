//! # Acquisition Module
//!
//! Runs polling sessions and exposes their data to the display layer.
//!
//! This module handles:
//! - The `Idle → Running → Stopped` session lifecycle
//! - Spawning the poll loop and stopping it at a tick boundary
//! - Exporting both buffers when a session ends
//! - Copy-on-read access to the window for plotting and statistics
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hydro_pulse::acquisition::{Acquisition, AcquisitionSettings};
//! use hydro_pulse::config::Config;
//! use hydro_pulse::export::FileExporter;
//! use hydro_pulse::serial::ModbusRtuTransport;
//!
//! # async fn run() -> hydro_pulse::error::Result<()> {
//! let config = Config::default();
//! let mut acquisition = Acquisition::new(
//!     config.registry()?,
//!     AcquisitionSettings::from_config(&config),
//!     Arc::new(FileExporter::from_config(&config.export)),
//! );
//!
//! let transport = ModbusRtuTransport::open(&config.serial)?;
//! acquisition.start(Box::new(transport)).await?;
//! // ...
//! let report = acquisition.stop().await?;
//! println!("session saved to {:?}", report.session_file);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod poll;
pub mod session;

pub use clock::{Clock, SystemClock};
pub use poll::{read_with_retry, PollLoop, PollSummary, RetryPolicy, TickReport};
pub use session::{SessionContext, SessionState, StopReason};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{ChannelStats, Sample};
use crate::channel::{Channel, ChannelId, ChannelRegistry, RegisterEncoding};
use crate::config::{Config, MAX_WINDOW_SECS};
use crate::error::{HydroPulseError, Result};
use crate::export::{ExportKind, Exporter, SampleTable};
use crate::serial::RegisterTransport;

/// Timing and conversion settings for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// Time between tick starts
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub encoding: RegisterEncoding,
    /// Rolling window length
    pub window: chrono::Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            encoding: RegisterEncoding::default(),
            window: chrono::Duration::seconds(crate::buffer::DEFAULT_WINDOW_SECS as i64),
        }
    }
}

impl AcquisitionSettings {
    /// Builds settings from configuration.
    ///
    /// Values that would make the poll loop unusable are clamped: the
    /// interval to at least 1 ms, the window to 1 s..=[`MAX_WINDOW_SECS`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let window_secs = config.window.seconds.clamp(1, MAX_WINDOW_SECS) as i64;
        Self {
            interval: Duration::from_millis(config.polling.interval_ms.max(1)),
            retry: RetryPolicy::new(
                config.polling.retries,
                Duration::from_millis(config.polling.retry_backoff_ms),
            ),
            encoding: RegisterEncoding::new(config.device.adc_max),
            window: chrono::Duration::seconds(window_secs),
        }
    }
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub summary: PollSummary,
    /// Window contents at stop, `None` if empty or the export failed
    pub window_file: Option<PathBuf>,
    /// Full session history, `None` if empty or the export failed
    pub session_file: Option<PathBuf>,
}

struct ActiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<SessionReport>,
}

/// Acquisition controller.
///
/// Owns the channel registry and at most one running session. The most
/// recent session's buffers stay readable after it stops, until the next
/// start replaces them.
pub struct Acquisition {
    registry: ChannelRegistry,
    settings: AcquisitionSettings,
    exporter: Arc<dyn Exporter>,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<SessionState>>,
    context: Option<Arc<SessionContext>>,
    active: Option<ActiveSession>,
}

impl Acquisition {
    #[must_use]
    pub fn new(
        registry: ChannelRegistry,
        settings: AcquisitionSettings,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        Self::with_clock(registry, settings, exporter, Arc::new(SystemClock))
    }

    /// Like [`Acquisition::new`] with a custom timestamp source.
    #[must_use]
    pub fn with_clock(
        registry: ChannelRegistry,
        settings: AcquisitionSettings,
        exporter: Arc<dyn Exporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            registry,
            settings,
            exporter,
            clock,
            state: Arc::new(state),
            context: None,
            active: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Mutable registry access. Changes apply from the next start; a
    /// running session keeps the channel set it started with.
    pub fn registry_mut(&mut self) -> &mut ChannelRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Buffers of the current or most recent session.
    #[must_use]
    pub fn context(&self) -> Option<Arc<SessionContext>> {
        self.context.clone()
    }

    /// Starts polling the enabled channels over `transport`.
    ///
    /// Every start gets fresh, empty buffers.
    ///
    /// # Errors
    ///
    /// - [`HydroPulseError::SessionAlreadyRunning`] if a session is running
    /// - [`HydroPulseError::NoChannelsConfigured`] if no channel is enabled
    pub async fn start(
        &mut self,
        transport: Box<dyn RegisterTransport>,
    ) -> Result<Arc<SessionContext>> {
        if self
            .active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
        {
            return Err(HydroPulseError::SessionAlreadyRunning);
        }

        // A session that ended on its own and was never stopped
        if let Some(previous) = self.active.take() {
            match previous.handle.await {
                Ok(report) => debug!("Discarding unclaimed report: {:?}", report.summary),
                Err(e) => warn!("Previous session task failed: {}", e),
            }
        }

        let channels: Vec<Channel> = self
            .registry
            .enabled_channels()
            .into_iter()
            .map(|id| self.registry.get(id).cloned())
            .collect::<Result<_>>()?;
        if channels.is_empty() {
            return Err(HydroPulseError::NoChannelsConfigured);
        }

        let context = Arc::new(SessionContext::new(
            channels,
            self.settings.window,
            self.clock.now(),
        ));
        let cancel = CancellationToken::new();
        let poll = PollLoop::new(
            transport,
            Arc::clone(&context),
            self.settings.clone(),
            Arc::clone(&self.clock),
        );

        info!(
            "Starting session with {} channels ({:?} interval, {}s window)",
            context.channels().len(),
            self.settings.interval,
            self.settings.window.num_seconds()
        );

        self.state.send_replace(SessionState::Running);
        let handle = tokio::spawn(run_session(
            poll,
            Arc::clone(&context),
            Arc::clone(&self.exporter),
            Arc::clone(&self.state),
            cancel.clone(),
        ));

        self.context = Some(Arc::clone(&context));
        self.active = Some(ActiveSession { cancel, handle });
        Ok(context)
    }

    /// Stops the running session after its current tick and waits for the
    /// final exports.
    ///
    /// If the session already ended on its own (device lost), this returns
    /// its report.
    ///
    /// # Errors
    ///
    /// - [`HydroPulseError::SessionNotRunning`] if there is nothing to stop
    /// - [`HydroPulseError::Task`] if the session task panicked
    pub async fn stop(&mut self) -> Result<SessionReport> {
        let active = self.active.take().ok_or(HydroPulseError::SessionNotRunning)?;
        active.cancel.cancel();

        match active.handle.await {
            Ok(report) => {
                info!(
                    "Session stopped: {} ticks, {} samples, {} missed reads",
                    report.summary.ticks, report.summary.samples, report.summary.missed
                );
                Ok(report)
            }
            Err(e) => {
                error!("Session task failed: {}", e);
                self.state
                    .send_replace(SessionState::Stopped(StopReason::Failed(e.to_string())));
                Err(HydroPulseError::Task(e.to_string()))
            }
        }
    }

    /// Copy of a channel's in-window samples.
    ///
    /// A configured channel that is not part of the current session (disabled,
    /// or nothing started yet) yields an empty series.
    ///
    /// # Errors
    ///
    /// Returns [`HydroPulseError::UnknownChannel`] for an unconfigured id.
    pub fn snapshot(&self, channel: ChannelId) -> Result<Vec<Sample>> {
        match self.context.as_ref().filter(|ctx| ctx.has_channel(channel)) {
            Some(ctx) => ctx.snapshot(channel),
            None => {
                self.registry.get(channel)?;
                Ok(Vec::new())
            }
        }
    }

    /// Window statistics for a channel, `None` while it has no samples.
    ///
    /// # Errors
    ///
    /// Returns [`HydroPulseError::UnknownChannel`] for an unconfigured id.
    pub fn statistics(&self, channel: ChannelId) -> Result<Option<ChannelStats>> {
        Ok(ChannelStats::from_samples(&self.snapshot(channel)?))
    }

    /// Exports the current window without clearing it.
    ///
    /// Returns `None` when there is nothing to save.
    pub async fn save_window(&self) -> Result<Option<PathBuf>> {
        let Some(context) = &self.context else {
            return Ok(None);
        };
        let table = context.window_table();
        if table.is_empty() {
            return Ok(None);
        }

        let exporter = Arc::clone(&self.exporter);
        let path = tokio::task::spawn_blocking(move || exporter.export(ExportKind::Window, &table))
            .await
            .map_err(|e| HydroPulseError::Task(e.to_string()))??;
        Ok(Some(path))
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

/// Body of the spawned session task.
async fn run_session(
    poll: PollLoop,
    context: Arc<SessionContext>,
    exporter: Arc<dyn Exporter>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
) -> SessionReport {
    let summary = poll.run(cancel).await;

    let window_file = export_table(&exporter, ExportKind::Window, context.window_table()).await;
    let session_file = export_table(&exporter, ExportKind::Session, context.session_table()).await;

    state.send_replace(SessionState::Stopped(summary.stop_reason.clone()));

    SessionReport {
        summary,
        window_file,
        session_file,
    }
}

/// Runs an export off the async workers. Failures are logged, not returned.
async fn export_table(
    exporter: &Arc<dyn Exporter>,
    kind: ExportKind,
    table: SampleTable,
) -> Option<PathBuf> {
    if table.is_empty() {
        debug!("Skipping empty {:?} export", kind);
        return None;
    }

    let exporter = Arc::clone(exporter);
    match tokio::task::spawn_blocking(move || exporter.export(kind, &table)).await {
        Ok(Ok(path)) => Some(path),
        Ok(Err(e)) => {
            error!("{:?} export failed: {}", kind, e);
            None
        }
        Err(e) => {
            error!("{:?} export task failed: {}", kind, e);
            None
        }
    }
}
