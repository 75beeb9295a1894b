//! # HydroPulse
//!
//! Headless acquisition front end: polls the configured sensor channels of
//! a hydraulic test bench over Modbus RTU until Ctrl+C or device loss, then
//! writes the window and full-session exports.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse command line, load configuration (defaults if the file is missing)
//!    - Set up logging to stdout and, optionally, a daily log file
//!    - Open the Modbus RTU link
//!
//! 2. **Acquisition**
//!    - Start a session over the enabled channels
//!    - Log per-channel window statistics every few seconds
//!
//! 3. **Shutdown**
//!    - Stop at the next tick boundary on Ctrl+C
//!    - Report the export files
//!
//! # Examples
//!
//! ```bash
//! hydro-pulse --config config/hydro-pulse.toml --port /dev/ttyUSB1 --baud 19200
//! ```
//!
//! Expected output:
//! ```text
//! INFO hydro_pulse: HydroPulse v0.1.0 starting...
//! INFO hydro_pulse: Modbus RTU link open at /dev/ttyUSB1
//! INFO hydro_pulse::acquisition: Starting session with 4 channels (100ms interval, 300s window)
//! INFO hydro_pulse: Main Pressure (bar): 212.4 (min 198.0, max 230.1, mean 214.9)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{interval, Duration};
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use hydro_pulse::acquisition::{
    Acquisition, AcquisitionSettings, SessionContext, SessionState, StopReason,
};
use hydro_pulse::config::{Config, LoggingConfig};
use hydro_pulse::error::HydroPulseError;
use hydro_pulse::export::FileExporter;
use hydro_pulse::serial::ModbusRtuTransport;

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/hydro-pulse.toml";

/// Seconds between statistics log messages
const STATUS_INTERVAL_SECS: u64 = 5;

/// Log file name prefix inside the logging directory
const LOG_FILE_PREFIX: &str = "hydro-pulse.log";

/// Poll Modbus RTU sensor channels with rolling-window and session logging
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overrides the configuration
    #[arg(long)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(long)]
    baud: Option<u32>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let _log_guard = init_logging(&config.logging);
    info!("HydroPulse v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.write_config {
        config
            .save(&args.config)
            .with_context(|| format!("failed to write {}", args.config.display()))?;
        info!("Configuration written to {}", args.config.display());
        return Ok(());
    }

    let mut acquisition = Acquisition::new(
        config.registry()?,
        AcquisitionSettings::from_config(&config),
        Arc::new(FileExporter::from_config(&config.export)),
    );

    let transport = ModbusRtuTransport::open(&config.serial)?;
    info!("Modbus RTU link open at {}", transport.device_path());

    let mut state = acquisition.subscribe();
    let context = acquisition.start(Box::new(transport)).await?;
    info!("Press Ctrl+C to stop");

    let mut status = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    // First tick completes immediately
    status.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }

            stopped = state.wait_for(|s| matches!(s, SessionState::Stopped(_))) => {
                if let Ok(s) = stopped {
                    warn!("Session ended: {:?}", *s);
                }
                break;
            }

            _ = status.tick() => {
                log_statistics(&acquisition, &context);
            }
        }
    }

    let report = acquisition.stop().await?;
    info!(
        "Total: {} ticks, {} samples, {} missed reads",
        report.summary.ticks, report.summary.samples, report.summary.missed
    );
    match &report.window_file {
        Some(path) => info!("Window saved to {}", path.display()),
        None => warn!("No window export written"),
    }
    match &report.session_file {
        Some(path) => info!("Session saved to {}", path.display()),
        None => warn!("No session export written"),
    }

    // Exit non-zero once the partial data is saved
    if let StopReason::DeviceLost(reason) = report.summary.stop_reason {
        return Err(HydroPulseError::DeviceLost(reason).into());
    }

    Ok(())
}

/// Loads the config file, or defaults when it does not exist, then applies
/// command line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        Config::default()
    };

    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }

    config.validate()?;
    Ok(config)
}

/// Installs the stdout subscriber and, when enabled, a daily log file.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    let stdout = tracing_subscriber::fmt::layer();

    if config.file {
        let appender = tracing_appender::rolling::daily(Path::new(&config.dir), LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        None
    }
}

fn log_statistics(acquisition: &Acquisition, context: &SessionContext) {
    for channel in context.channels() {
        match acquisition.statistics(channel.id) {
            Ok(Some(stats)) => info!(
                "{}: {:.1} (min {:.1}, max {:.1}, mean {:.1})",
                channel.label(),
                stats.current,
                stats.min,
                stats.max,
                stats.mean
            ),
            Ok(None) => info!("{}: no samples yet", channel.label()),
            Err(e) => warn!("{}: {}", channel.label(), e),
        }
    }
}
