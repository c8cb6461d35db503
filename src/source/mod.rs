//! Event log backends.

pub mod file;
#[cfg(test)]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::core::RawMessage;
use crate::error::{ConfigError, SourceError};

/// An append-only, replayable log of raw transaction events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Open (or reopen) the log at the last committed position.
    async fn connect(&mut self) -> Result<(), SourceError>;

    /// Return up to `max_items` messages, waiting at most `max_wait` for the
    /// first one. An empty batch is not an error.
    async fn poll_batch(
        &mut self,
        max_items: usize,
        max_wait: Duration,
    ) -> Result<Vec<RawMessage>, SourceError>;

    /// Mark everything before `next_offset` as consumed.
    async fn commit(&mut self, next_offset: u64) -> Result<(), SourceError>;

    /// Backend type for logging.
    fn kind(&self) -> &'static str;
}

pub fn build_event_log(config: &SourceConfig) -> Result<Box<dyn EventLog>, ConfigError> {
    match config.kind.as_str() {
        "file" => Ok(Box::new(file::FileEventLog::new(&config.path))),
        other => Err(ConfigError::Invalid(format!("unknown source kind {other:?}"))),
    }
}
