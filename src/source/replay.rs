//! Replay of recorded or scripted byte streams.
//!
//! Used by the `replay` command to push a raw serial dump through the same
//! session path as a live capture, and by tests to control chunk boundaries,
//! idle polls and link failures exactly.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use super::ByteSource;
use crate::error::{AppResult, DaqError};

#[derive(Debug, Clone)]
enum Step {
    Chunk(Bytes),
    Fail(String),
}

/// Byte source that plays back a fixed sequence of polls.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    label: String,
    steps: VecDeque<Step>,
    hold_open: Option<Duration>,
}

impl ReplaySource {
    /// Empty script; add steps with the builder methods.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Split `data` into polls of at most `read_size` bytes.
    pub fn from_bytes(label: impl Into<String>, data: &[u8], read_size: usize) -> Self {
        let mut source = Self::new(label);
        for chunk in data.chunks(read_size.max(1)) {
            source = source.chunk(chunk.to_vec());
        }
        source
    }

    /// Read a raw capture file and replay it in `read_size` polls.
    pub async fn from_file(path: impl AsRef<Path>, read_size: usize) -> AppResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(path.display().to_string(), &data, read_size))
    }

    /// Queue a poll returning `bytes`.
    pub fn chunk(mut self, bytes: impl Into<Bytes>) -> Self {
        self.steps.push_back(Step::Chunk(bytes.into()));
        self
    }

    /// Queue a poll that times out with no data.
    pub fn idle(self) -> Self {
        self.chunk(Bytes::new())
    }

    /// Queue a fatal link error.
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.steps.push_back(Step::Fail(reason.into()));
        self
    }

    /// Once the script is exhausted, keep returning idle polls every `timeout`
    /// instead of reporting end of stream.
    pub fn hold_open(mut self, timeout: Duration) -> Self {
        self.hold_open = Some(timeout);
        self
    }

    /// Polls left in the script.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl ByteSource for ReplaySource {
    async fn poll(&mut self) -> AppResult<Option<Bytes>> {
        match self.steps.pop_front() {
            Some(Step::Chunk(bytes)) => Ok(Some(bytes)),
            Some(Step::Fail(reason)) => Err(DaqError::LinkClosed(reason)),
            None => match self.hold_open {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    Ok(Some(Bytes::new()))
                }
                None => Ok(None),
            },
        }
    }

    fn describe(&self) -> String {
        format!("ReplaySource({})", self.label)
    }
}
