//! Byte sources feeding the capture loop.
//!
//! A [`ByteSource`] hands out whatever bytes the link produced since the last
//! poll. Each poll waits at most a bounded timeout, which is what bounds the
//! stop latency of a capture session.
//!
//! # Available Sources
//!
//! - `SerialSource` - the real device over a serial port (feature `instrument_serial`)
//! - [`ReplaySource`] - a recorded byte dump or a scripted chunk sequence
//! - [`SimulatedDevice`] - synthetic puff telemetry for demos and tests

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AppResult;

pub mod replay;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod simulated;

pub use replay::ReplaySource;
#[cfg(feature = "instrument_serial")]
pub use serial::{available_ports, SerialSource};
pub use simulated::{SimulatedDevice, SimulationProfile};

/// A link delivering raw telemetry bytes.
///
/// # Contract
/// - `Ok(Some(chunk))` - bytes read during this poll; an empty chunk means the
///   poll timed out with nothing available, which is not an error
/// - `Ok(None)` - the source has cleanly run out of data (replays, simulations)
/// - `Err(_)` - the link failed and cannot be read again
///
/// Bytes are consumed from the link exactly once.
#[async_trait]
pub trait ByteSource: Send {
    /// Wait up to the poll timeout for the next chunk.
    async fn poll(&mut self) -> AppResult<Option<Bytes>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    async fn poll(&mut self) -> AppResult<Option<Bytes>> {
        (**self).poll().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
