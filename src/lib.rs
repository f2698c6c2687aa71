//! # gg-daq Core Library
//!
//! Capture of puff telemetry streamed by a battery-powered heating device over a
//! serial link. The device writes back-to-back MessagePack maps; this crate
//! decodes them incrementally, separates measurements from diagnostic chatter,
//! and after the operator stops the capture derives power and aligns the time
//! axis to the puff onset before exporting the table.
//!
//! ## Crate Structure
//!
//! - **`codec`**: MessagePack [`Value`](codec::Value) model, the resumable
//!   [`FrameDecoder`](codec::FrameDecoder) and an encoder used by simulation
//!   and tests.
//! - **`record`**: string-keyed records and the diagnostic/measurement classifier.
//! - **`source`**: the [`ByteSource`](source::ByteSource) trait with serial,
//!   replay and simulated implementations.
//! - **`session`**: the [`CaptureSession`](session::CaptureSession) state machine
//!   that owns the decoder and the measurement log.
//! - **`finalize`**: post-capture power derivation and onset alignment.
//! - **`storage`**: CSV and JSON export sinks.
//! - **`pipeline`**: run, finalize and export in one call.
//! - **`config`**: layered configuration using `figment`.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the crate-wide [`DaqError`](error::DaqError).

pub mod codec;
pub mod config;
pub mod error;
pub mod finalize;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod session;
pub mod source;
pub mod storage;
