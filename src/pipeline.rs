//! End-to-end capture: run the session, finalize, export.
//!
//! The pipeline never gives up on captured data because of a link failure.
//! An empty session or a failed export is reported in the [`CaptureReport`]
//! rather than as an error, so the caller can tell the operator what happened.

use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{AppResult, DaqError};
use crate::finalize::FinalizedTable;
use crate::session::{CaptureSession, CaptureStats, StopReason};
use crate::source::ByteSource;
use crate::storage::ExportSink;

/// What happened to the finalized table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Table written to this path.
    Written(PathBuf),
    /// No measurement records were captured; nothing to write.
    Empty,
    /// Finalization or the sink failed.
    Failed(String),
}

/// Summary of one capture run.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Why capture ended.
    pub stop: StopReason,
    /// Session counters.
    pub stats: CaptureStats,
    /// The finalized table, if one could be built.
    pub table: Option<FinalizedTable>,
    /// Export result.
    pub export: ExportOutcome,
}

/// Capture from `source` until stopped, then finalize and hand the table to `sink`.
///
/// # Errors
///
/// Only session misuse (for example a session that already ran) is returned
/// as an error. Link, finalization and export failures end up in the report.
pub async fn run_capture<S>(
    session: &mut CaptureSession,
    source: &mut S,
    stop: &mut watch::Receiver<bool>,
    sink: &mut dyn ExportSink,
) -> AppResult<CaptureReport>
where
    S: ByteSource + ?Sized,
{
    let reason = session.run(source, stop).await?;
    let stats = session.stats();
    info!(device = session.device(), reason = %reason, stats = %stats, "Capture finished");

    let table = match session.finalize() {
        Ok(table) => table,
        Err(DaqError::EmptySession) => {
            warn!(device = session.device(), "No measurement records captured");
            return Ok(CaptureReport {
                stop: reason,
                stats,
                table: None,
                export: ExportOutcome::Empty,
            });
        }
        Err(err) => {
            error!(error = %err, "Finalization failed");
            return Ok(CaptureReport {
                stop: reason,
                stats,
                table: None,
                export: ExportOutcome::Failed(err.to_string()),
            });
        }
    };

    let started_at = session.started_at().unwrap_or_else(chrono::Local::now);
    let export = match sink.export(session.device(), started_at, &table) {
        Ok(path) => ExportOutcome::Written(path),
        Err(err) => {
            error!(error = %err, "Export failed");
            ExportOutcome::Failed(err.to_string())
        }
    };

    Ok(CaptureReport {
        stop: reason,
        stats,
        table: Some(table),
        export,
    })
}
