//! Capture session lifecycle.
//!
//! A [`CaptureSession`] owns the decoder, the measurement log and the run/stop
//! state. Nothing else mutates them, so the capture loop needs no locking.
//!
//! # State Machine
//!
//! ```text
//! Idle ──start──> Running ──stop / cancel / link failure / end of stream──> Stopping
//!                                                                              │
//!                                                              finalize (once) │
//!                                                                              ▼
//!                                                                          Finalized
//! ```
//!
//! There are no reverse transitions. A link failure still leads to
//! finalization of whatever was captured.

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::codec::{DecoderLimits, FrameDecoder};
use crate::error::{AppResult, DaqError};
use crate::finalize::{finalize, FinalizedTable};
use crate::record::{classify, Classified, Record};
use crate::source::ByteSource;

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created, not yet capturing
    Idle,
    /// Polling the link and appending measurements
    Running,
    /// Capture ended; log frozen, waiting for finalization
    Stopping,
    /// Finalizer has run; terminal
    Finalized,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Stopping => write!(f, "Stopping"),
            SessionState::Finalized => write!(f, "Finalized"),
        }
    }
}

/// Why the capture loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The operator asked to stop.
    Cancelled,
    /// The source ran out of data (replay or simulation).
    EndOfStream,
    /// The link failed; the message describes the failure.
    LinkFailed(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "stopped by operator"),
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::LinkFailed(reason) => write!(f, "link failed: {reason}"),
        }
    }
}

/// Counters describing one capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Polls made against the source
    pub polls: u64,
    /// Polls that timed out without data
    pub idle_polls: u64,
    /// Raw bytes received
    pub bytes_received: u64,
    /// Measurement records appended to the log
    pub measurements: u64,
    /// Diagnostic records shown to the operator
    pub diagnostics: u64,
    /// Decoded values that were not records
    pub rejected: u64,
    /// Failed extraction attempts
    pub decode_errors: u64,
    /// Bytes of an incomplete record left in the decoder at stop
    pub trailing_bytes: u64,
}

impl std::fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} debug, {} rejected, {} decode errors, {} bytes in {} polls",
            self.measurements,
            self.diagnostics,
            self.rejected,
            self.decode_errors,
            self.bytes_received,
            self.polls
        )
    }
}

/// One capture run against one device.
#[derive(Debug)]
pub struct CaptureSession {
    device: String,
    state: SessionState,
    limits: DecoderLimits,
    decoder: FrameDecoder,
    log: Vec<Record>,
    stats: CaptureStats,
    started_at: Option<DateTime<Local>>,
}

impl CaptureSession {
    /// New idle session for `device` with default decoder limits.
    pub fn new(device: impl Into<String>) -> Self {
        Self::with_limits(device, DecoderLimits::default())
    }

    /// New idle session with custom decoder limits.
    pub fn with_limits(device: impl Into<String>, limits: DecoderLimits) -> Self {
        Self {
            device: device.into(),
            state: SessionState::Idle,
            limits,
            decoder: FrameDecoder::with_limits(limits),
            log: Vec::new(),
            stats: CaptureStats::default(),
            started_at: None,
        }
    }

    /// Device identifier, used for export naming.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Local wall-clock time capture started.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Measurement log in arrival order.
    pub fn log(&self) -> &[Record] {
        &self.log
    }

    /// Capture counters.
    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Bytes held by the decoder waiting for the rest of a record.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    fn expect_state(&self, expected: SessionState, action: &'static str) -> AppResult<()> {
        if self.state != expected {
            return Err(DaqError::InvalidTransition {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    /// `Idle -> Running`: fresh decoder, empty log, start timestamp recorded.
    pub fn start(&mut self) -> AppResult<()> {
        self.expect_state(SessionState::Idle, "start")?;
        self.decoder = FrameDecoder::with_limits(self.limits);
        self.log.clear();
        self.stats = CaptureStats::default();
        self.started_at = Some(Local::now());
        self.state = SessionState::Running;
        info!(device = %self.device, "Capture started");
        Ok(())
    }

    /// `Running -> Stopping`: freeze the log.
    pub fn stop(&mut self) -> AppResult<()> {
        self.expect_state(SessionState::Running, "stop")?;
        self.state = SessionState::Stopping;
        self.stats.trailing_bytes = self.decoder.buffered() as u64;
        if self.stats.trailing_bytes > 0 {
            warn!(
                bytes = self.stats.trailing_bytes,
                "Discarding incomplete trailing record"
            );
        }
        let decoder = self.decoder.stats();
        info!(
            device = %self.device,
            stats = %self.stats,
            discarded_bytes = decoder.discarded_bytes,
            "Capture stopped"
        );
        Ok(())
    }

    /// Feed one raw chunk through the decoder and classifier.
    ///
    /// Decode errors and rejected values are logged and skipped; they never
    /// stop processing of the rest of the chunk.
    pub fn ingest(&mut self, chunk: &[u8]) -> AppResult<()> {
        self.expect_state(SessionState::Running, "ingest data")?;
        self.stats.bytes_received += chunk.len() as u64;

        for result in self.decoder.feed(chunk) {
            let value = match result {
                Ok(value) => value,
                Err(err) => {
                    self.stats.decode_errors += 1;
                    warn!(error = %err, "Decode error, resynchronizing");
                    continue;
                }
            };
            match classify(value) {
                Classified::Measurement(record) => {
                    self.stats.measurements += 1;
                    self.log.push(record);
                }
                Classified::Diagnostic(record) => {
                    self.stats.diagnostics += 1;
                    info!(target: "gg_daq::device", "DEBUG: {record}");
                }
                Classified::Rejected(value) => {
                    self.stats.rejected += 1;
                    warn!(kind = value.type_name(), "Rejecting {value}");
                }
            }
        }
        Ok(())
    }

    /// Poll `source` until stopped, then move to `Stopping`.
    ///
    /// Starts the session first if it is still idle. The stop signal is
    /// checked before every poll and raced against a pending poll, so the
    /// latency of a stop is bounded by the source's poll timeout. A dropped
    /// sender counts as a stop request.
    ///
    /// A link failure is not returned as an error: it ends the loop with
    /// [`StopReason::LinkFailed`] so the captured data can still be finalized.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        stop: &mut watch::Receiver<bool>,
    ) -> AppResult<StopReason>
    where
        S: ByteSource + ?Sized,
    {
        if self.state == SessionState::Idle {
            self.start()?;
        }
        self.expect_state(SessionState::Running, "run")?;
        debug!(source = %source.describe(), "Entering capture loop");

        let reason = loop {
            if *stop.borrow_and_update() {
                break StopReason::Cancelled;
            }

            let polled: AppResult<Option<Bytes>> = tokio::select! {
                biased;
                changed = stop.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break StopReason::Cancelled,
                },
                polled = source.poll() => polled,
            };

            self.stats.polls += 1;
            match polled {
                Ok(Some(chunk)) if chunk.is_empty() => self.stats.idle_polls += 1,
                Ok(Some(chunk)) => self.ingest(&chunk)?,
                Ok(None) => break StopReason::EndOfStream,
                Err(err) => {
                    error!(error = %err, source = %source.describe(), "Link failure, finalizing captured data");
                    break StopReason::LinkFailed(err.to_string());
                }
            }
        };

        self.stop()?;
        Ok(reason)
    }

    /// `Stopping -> Finalized`: run the finalizer on the frozen log.
    ///
    /// Runs at most once. The session becomes `Finalized` even when the
    /// finalizer reports an error such as [`DaqError::EmptySession`].
    pub fn finalize(&mut self) -> AppResult<FinalizedTable> {
        self.expect_state(SessionState::Stopping, "finalize")?;
        self.state = SessionState::Finalized;
        let table = finalize(&self.log)?;
        info!(
            rows = table.len(),
            onset = ?table.onset_index(),
            peak_power = table.peak_power(),
            "Measurement log finalized"
        );
        Ok(table)
    }
}
