use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, SourceConfig};
use crate::core::TransactionRecord;
use crate::core::dedup::DedupWindow;
use crate::core::tx::{self, Rejection, ValidationRules};
use crate::error::{PipelineError, SourceError};
use crate::retry::ExponentialBackoff;
use crate::source::EventLog;

/// One poll's worth of messages, already decoded and deduplicated.
#[derive(Debug, Default)]
pub struct ConsumedBatch {
    pub accepted: Vec<TransactionRecord>,
    pub rejected: Vec<Rejection>,
    pub duplicates: u64,
    pub received: u64,
    /// Offset to commit once every message in the batch is disposed of.
    pub ack_offset: Option<u64>,
}

impl ConsumedBatch {
    pub fn is_empty(&self) -> bool {
        self.received == 0
    }

    /// Messages that decoded and validated, duplicates included.
    pub fn validated(&self) -> u64 {
        self.accepted.len() as u64 + self.duplicates
    }
}

/// Pulls raw batches from the event log, decodes and validates them, and
/// drops checksums already seen inside the dedup window.
pub struct StreamConsumer {
    log: Box<dyn EventLog>,
    dedup: DedupWindow,
    rules: ValidationRules,
    batch_size: usize,
    poll_timeout: Duration,
    reconnect_attempts: u32,
    reconnect_backoff: Duration,
    max_reconnect_backoff: Duration,
}

impl StreamConsumer {
    pub fn new(log: Box<dyn EventLog>, pipeline: &PipelineConfig, source: &SourceConfig) -> Self {
        Self {
            log,
            dedup: DedupWindow::new(pipeline.dedup_window(), pipeline.dedup_max_entries),
            rules: ValidationRules {
                max_clock_skew: pipeline.clock_skew(),
            },
            batch_size: pipeline.batch_size,
            poll_timeout: pipeline.poll_timeout(),
            reconnect_attempts: source.reconnect_attempts,
            reconnect_backoff: Duration::from_millis(source.reconnect_backoff_ms),
            max_reconnect_backoff: Duration::from_millis(source.max_reconnect_backoff_ms),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.log.kind()
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.reconnect_backoff,
            self.max_reconnect_backoff,
            self.reconnect_attempts,
        )
    }

    fn unavailable(&self, err: SourceError) -> PipelineError {
        PipelineError::dependency(format!("{} event log", self.log.kind()), err)
    }

    /// Connect, retrying with backoff.
    pub async fn connect(&mut self) -> Result<(), PipelineError> {
        let mut backoff = self.backoff();
        loop {
            match self.log.connect().await {
                Ok(()) => {
                    info!("Connected to {} event log", self.log.kind());
                    return Ok(());
                }
                Err(err) => {
                    warn!("Event log connect failed: {}", err);
                    if backoff.sleep("event log connect").await.is_err() {
                        return Err(self.unavailable(err));
                    }
                }
            }
        }
    }

    async fn reconnect(&mut self, backoff: &mut ExponentialBackoff, mut last: SourceError) -> Result<(), PipelineError> {
        loop {
            if backoff.sleep("event log reconnect").await.is_err() {
                return Err(self.unavailable(last));
            }
            match self.log.connect().await {
                Ok(()) => {
                    info!("Reconnected to {} event log", self.log.kind());
                    return Ok(());
                }
                Err(err) => {
                    warn!("Event log reconnect failed: {}", err);
                    last = err;
                }
            }
        }
    }

    /// Pull one batch. Fails only when the log stays unreachable after the
    /// configured reconnect attempts.
    pub async fn poll_batch(&mut self) -> Result<ConsumedBatch, PipelineError> {
        let mut backoff = self.backoff();
        let raw = loop {
            match self.log.poll_batch(self.batch_size, self.poll_timeout).await {
                Ok(raw) => break raw,
                Err(err) => {
                    warn!("Event log poll failed: {}", err);
                    self.reconnect(&mut backoff, err).await?;
                }
            }
        };

        let mut batch = ConsumedBatch {
            received: raw.len() as u64,
            ack_offset: raw.last().map(|m| m.next_offset),
            ..ConsumedBatch::default()
        };
        for message in &raw {
            match tx::decode(message, &self.rules) {
                Ok(record) => {
                    if self.dedup.check_and_insert(&record.checksum, message.received_at) {
                        batch.accepted.push(record);
                    } else {
                        debug!(
                            wallet = %record.wallet,
                            offset = record.offset,
                            checksum = %record.checksum,
                            "Duplicate message dropped"
                        );
                        batch.duplicates += 1;
                    }
                }
                Err(rejection) => batch.rejected.push(rejection),
            }
        }
        Ok(batch)
    }

    /// Commit everything before `next_offset`.
    pub async fn acknowledge(&mut self, next_offset: u64) -> Result<(), PipelineError> {
        match self.log.commit(next_offset).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.unavailable(err)),
        }
    }
}
