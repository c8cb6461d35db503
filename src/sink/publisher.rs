use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::ScoreSink;
use crate::config::PublisherConfig;
use crate::core::ReputationScore;
use crate::core::counters::PipelineCounters;
use crate::error::{PipelineError, SinkError};
use crate::retry::ExponentialBackoff;

/// Successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Total sends it took, including the successful one.
    pub attempts: u32,
}

/// Serializes scores and delivers them with bounded retry.
pub struct Publisher {
    sink: Arc<dyn ScoreSink>,
    counters: Arc<PipelineCounters>,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    attempt_timeout: Duration,
}

impl Publisher {
    pub fn new(
        sink: Arc<dyn ScoreSink>,
        counters: Arc<PipelineCounters>,
        config: &PublisherConfig,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            counters,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout,
        }
    }

    pub async fn ping(&self) -> Result<(), PipelineError> {
        self.sink
            .ping()
            .await
            .map_err(|e| PipelineError::dependency(format!("{} sink", self.sink.kind()), e))
    }

    /// Deliver one score. Transient failures are retried up to the attempt
    /// limit, each one counted in `publish_retries`. A permanent failure
    /// stops immediately. The caller counts the final failure.
    pub async fn publish(&self, score: &ReputationScore) -> Result<PublishAck, PipelineError> {
        let payload = serde_json::to_vec(score).map_err(|e| PipelineError::Publish {
            attempts: 0,
            reason: format!("serialization failed: {e}"),
        })?;

        let mut backoff = ExponentialBackoff::new(
            self.initial_backoff,
            self.max_backoff,
            self.max_attempts - 1,
        );
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.attempt_timeout,
                self.sink.send(&score.wallet_address, &payload),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Transient(format!(
                    "timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(()) => {
                    debug!(wallet = %score.wallet_address, attempt = attempts, "Score published");
                    return Ok(PublishAck { attempts });
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                error!(wallet = %score.wallet_address, attempt = attempts, "Publish rejected: {}", err);
                return Err(PipelineError::Publish {
                    attempts,
                    reason: err.to_string(),
                });
            }

            self.counters.add_publish_retries(1);
            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        wallet = %score.wallet_address,
                        attempt = attempts,
                        "Publish failed, retrying in {}ms: {}",
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(wallet = %score.wallet_address, attempt = attempts, "Publish gave up: {}", err);
                    return Err(PipelineError::Publish {
                        attempts,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}
