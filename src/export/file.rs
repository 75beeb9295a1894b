//! # File Exporter
//!
//! Writes sample tables as CSV (opens directly in spreadsheet applications)
//! or JSON Lines.
//!
//! ## Layout
//!
//! ```text
//! <log_dir>/2024-05-01_08-00-00.csv                 window saves
//! <log_dir>/session/2024-05-01_08-00-00_full.csv    full-session exports
//! ```
//!
//! CSV files have a `Timestamp` column followed by one column per channel,
//! one row per poll tick. Values are rounded to the configured number of
//! decimals; a missed read is an empty cell. JSON Lines files carry one
//! record per sample with full precision.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::info;

use super::{ExportKind, Exporter, SampleTable};
use crate::channel::ChannelId;
use crate::config::{ExportConfig, ExportFormat};
use crate::error::Result;

/// Sub-directory for full-session exports.
pub const SESSION_SUBDIR: &str = "session";

/// Writes exports to timestamped files under a directory.
#[derive(Debug, Clone)]
pub struct FileExporter {
    dir: PathBuf,
    format: ExportFormat,
    decimals: usize,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: &'a DateTime<Utc>,
    channel: ChannelId,
    name: &'a str,
    units: &'a str,
    raw: u16,
    value: f64,
}

impl FileExporter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, format: ExportFormat, decimals: usize) -> Self {
        Self {
            dir: dir.into(),
            format,
            decimals,
        }
    }

    #[must_use]
    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.log_dir, config.format, config.decimals)
    }

    fn extension(&self) -> &'static str {
        match self.format {
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
        }
    }

    /// Picks a path that does not overwrite an earlier export.
    fn target_path(&self, kind: ExportKind) -> Result<PathBuf> {
        let (dir, suffix) = match kind {
            ExportKind::Window => (self.dir.clone(), ""),
            ExportKind::Session => (self.dir.join(SESSION_SUBDIR), "_full"),
        };
        fs::create_dir_all(&dir)?;

        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let ext = self.extension();
        let mut path = dir.join(format!("{}{}.{}", stamp, suffix, ext));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{}{}-{}.{}", stamp, suffix, n, ext));
            n += 1;
        }
        Ok(path)
    }

    fn write_csv(&self, path: &Path, table: &SampleTable) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["Timestamp".to_string()];
        header.extend(table.channels.iter().map(|c| c.label()));
        writer.write_record(&header)?;

        for row in table.rows() {
            let mut record = Vec::with_capacity(row.values.len() + 1);
            record.push(
                row.timestamp
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S%.3f")
                    .to_string(),
            );
            record.extend(row.values.iter().map(|value| match value {
                Some(v) => format!("{:.*}", self.decimals, v),
                None => String::new(),
            }));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn write_jsonl(&self, path: &Path, table: &SampleTable) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        for (channel, sample) in table.samples_in_order() {
            let record = JsonRecord {
                timestamp: &sample.timestamp,
                channel: channel.id,
                name: &channel.name,
                units: &channel.units,
                raw: sample.raw,
                value: sample.value,
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl Exporter for FileExporter {
    fn export(&self, kind: ExportKind, table: &SampleTable) -> Result<PathBuf> {
        let path = self.target_path(kind)?;

        match self.format {
            ExportFormat::Csv => self.write_csv(&path, table)?,
            ExportFormat::Jsonl => self.write_jsonl(&path, table)?,
        }

        info!(
            "Exported {} samples ({:?}) to {}",
            table.sample_count(),
            kind,
            path.display()
        );
        Ok(path)
    }
}
