//! # Buffer Module
//!
//! Sample storage for live display and full-session export.
//!
//! This module handles:
//! - The rolling window of recent samples used for plotting
//! - The append-only session log used for the full-session export
//! - Per-channel statistics over the window

pub mod sample;
pub mod session;
pub mod stats;
pub mod window;

pub use sample::Sample;
pub use session::SessionLog;
pub use stats::ChannelStats;
pub use window::{RollingWindow, DEFAULT_WINDOW_SECS};
