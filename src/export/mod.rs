//! # Export Module
//!
//! Hands buffer contents to a file writer.
//!
//! This module handles:
//! - The `Exporter` seam between the acquisition core and file output
//! - Aligning per-channel series into spreadsheet rows
//! - Writing CSV or JSON Lines files under the log directory

pub mod file;
pub mod table;

pub use file::FileExporter;
pub use table::{Row, SampleTable};

use std::path::PathBuf;

use crate::error::Result;

/// Which buffer an export comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Rolling window contents ("current window save")
    Window,
    /// Full session history, written at stop
    Session,
}

/// Consumer of buffer contents.
#[cfg_attr(test, mockall::automock)]
pub trait Exporter: Send + Sync {
    /// Persist `table`, returning where it was written.
    fn export(&self, kind: ExportKind, table: &SampleTable) -> Result<PathBuf>;
}
