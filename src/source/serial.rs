//! Serial port byte source.
//!
//! Opens the device with `tokio-serial` and reads at most `read_size` bytes per
//! poll, giving up after the configured poll timeout.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::ByteSource;
use crate::config::SerialConfig;
use crate::error::{AppResult, DaqError};

/// Telemetry link over RS-232 / USB-serial.
pub struct SerialSource {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    stream: SerialStream,
    buffer: Vec<u8>,
}

impl SerialSource {
    /// Open `port_name` with the given settings.
    ///
    /// # Errors
    /// Returns [`DaqError::Serial`] if the port cannot be opened.
    pub fn open(port_name: &str, config: &SerialConfig) -> AppResult<Self> {
        let stream = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(config.poll_timeout())
            .open_native_async()?;

        debug!(
            port = port_name,
            baud = config.baud_rate,
            "Serial port opened"
        );

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate: config.baud_rate,
            timeout: config.poll_timeout(),
            stream,
            buffer: vec![0u8; config.read_size.max(1)],
        })
    }
}

#[async_trait]
impl ByteSource for SerialSource {
    async fn poll(&mut self) -> AppResult<Option<Bytes>> {
        match tokio::time::timeout(self.timeout, self.stream.read(&mut self.buffer)).await {
            Err(_elapsed) => Ok(Some(Bytes::new())),
            Ok(Ok(0)) => Err(DaqError::LinkClosed(format!(
                "serial port '{}' reached end of stream",
                self.port_name
            ))),
            Ok(Ok(n)) => Ok(Some(Bytes::copy_from_slice(&self.buffer[..n]))),
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => Ok(Some(Bytes::new())),
            Ok(Err(e)) => Err(DaqError::Io(e)),
        }
    }

    fn describe(&self) -> String {
        format!("SerialSource({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
