//! Export sinks for finalized tables.
//!
//! Each finished capture is written to one file in the output directory, named
//! `<device>_<YYYY-MM-DD-HH-MM-SS>.<ext>` after the capture start time.
//!
//! # Formats
//!
//! - **CSV** (default, feature `storage_csv`): a leading unnamed index column
//!   followed by the table columns. Cells a row does not have are left blank.
//! - **JSON**: an array of row objects.

use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{AppResult, DaqError};
use crate::finalize::FinalizedTable;

/// File format of an exported table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma separated values with an index column
    #[default]
    Csv,
    /// Array of JSON objects
    Json,
}

impl ExportFormat {
    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// File name for a capture of `device` started at `started_at`.
pub fn export_file_name(device: &str, started_at: DateTime<Local>, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        device,
        started_at.format("%Y-%m-%d-%H-%M-%S"),
        format.extension()
    )
}

/// Destination for finalized tables.
pub trait ExportSink: Send {
    /// Persist `table` and return the path written.
    fn export(
        &mut self,
        device: &str,
        started_at: DateTime<Local>,
        table: &FinalizedTable,
    ) -> AppResult<PathBuf>;
}

fn prepare_path(
    dir: &Path,
    device: &str,
    started_at: DateTime<Local>,
    format: ExportFormat,
) -> AppResult<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .map_err(|e| DaqError::Export(format!("cannot create '{}': {e}", dir.display())))?;
    }
    Ok(dir.join(export_file_name(device, started_at, format)))
}

/// CSV writer.
#[cfg(feature = "storage_csv")]
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

#[cfg(feature = "storage_csv")]
impl CsvExporter {
    /// Writer targeting `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn cell(value: Option<&crate::codec::Value>) -> String {
        use crate::codec::value::format_float;
        use crate::codec::Value;

        match value {
            None | Some(Value::Nil) => String::new(),
            Some(Value::Float(x)) => format_float(*x),
            Some(Value::Str(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

#[cfg(feature = "storage_csv")]
impl ExportSink for CsvExporter {
    fn export(
        &mut self,
        device: &str,
        started_at: DateTime<Local>,
        table: &FinalizedTable,
    ) -> AppResult<PathBuf> {
        let path = prepare_path(&self.dir, device, started_at, ExportFormat::Csv)?;
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| DaqError::Export(format!("Failed to create CSV file: {e}")))?;

        let header = std::iter::once("").chain(table.columns().iter().map(String::as_str));
        writer
            .write_record(header)
            .map_err(|e| DaqError::Export(e.to_string()))?;

        for (index, row) in table.rows().iter().enumerate() {
            let mut record = Vec::with_capacity(table.columns().len() + 1);
            record.push(index.to_string());
            record.extend(
                table
                    .columns()
                    .iter()
                    .map(|column| Self::cell(row.get(column))),
            );
            writer
                .write_record(&record)
                .map_err(|e| DaqError::Export(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| DaqError::Export(e.to_string()))?;

        info!(path = %path.display(), rows = table.len(), "CSV export written");
        Ok(path)
    }
}

/// Placeholder when CSV support is compiled out.
#[cfg(not(feature = "storage_csv"))]
#[derive(Debug, Clone)]
pub struct CsvExporter;

#[cfg(not(feature = "storage_csv"))]
impl CsvExporter {
    /// Writer targeting `dir`.
    pub fn new(_dir: impl Into<PathBuf>) -> Self {
        Self
    }
}

#[cfg(not(feature = "storage_csv"))]
impl ExportSink for CsvExporter {
    fn export(
        &mut self,
        _device: &str,
        _started_at: DateTime<Local>,
        _table: &FinalizedTable,
    ) -> AppResult<PathBuf> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

/// JSON writer.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    dir: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Compact writer targeting `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pretty: false,
        }
    }

    /// Indent the output.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl ExportSink for JsonExporter {
    fn export(
        &mut self,
        device: &str,
        started_at: DateTime<Local>,
        table: &FinalizedTable,
    ) -> AppResult<PathBuf> {
        let path = prepare_path(&self.dir, device, started_at, ExportFormat::Json)?;
        let file = File::create(&path)
            .map_err(|e| DaqError::Export(format!("Failed to create JSON file: {e}")))?;
        let writer = BufWriter::new(file);
        let written = if self.pretty {
            serde_json::to_writer_pretty(writer, table)
        } else {
            serde_json::to_writer(writer, table)
        };
        written.map_err(|e| DaqError::Export(e.to_string()))?;

        info!(path = %path.display(), rows = table.len(), "JSON export written");
        Ok(path)
    }
}

/// Sink for `format` writing into `dir`.
pub fn exporter_for(format: ExportFormat, dir: impl Into<PathBuf>) -> Box<dyn ExportSink> {
    match format {
        ExportFormat::Csv => Box::new(CsvExporter::new(dir)),
        ExportFormat::Json => Box::new(JsonExporter::new(dir).with_pretty(true)),
    }
}
