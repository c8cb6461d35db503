use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::core::counters::PipelineCounters;
use crate::core::tx::Rejection;
use crate::core::{ScoreFailure, TransactionRecord};
use crate::db::SharedDatabase;
use crate::error::PipelineError;
use crate::sink::ScoreSink;

/// Dead-letter path for messages that cannot be scored.
///
/// Counting happens first and never fails; the dead-letter sink and the
/// database are best effort, one attempt each.
pub struct Quarantine {
    sink: Option<Arc<dyn ScoreSink>>,
    db: Option<SharedDatabase>,
    counters: Arc<PipelineCounters>,
}

impl Quarantine {
    pub fn new(
        sink: Option<Arc<dyn ScoreSink>>,
        db: Option<SharedDatabase>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self { sink, db, counters }
    }

    /// Quarantine a message that failed decoding or validation.
    pub async fn reject(&self, rejection: &Rejection) -> ScoreFailure {
        self.record(ScoreFailure {
            wallet_address: rejection.wallet.clone(),
            offset: rejection.offset,
            checksum: rejection.checksum.clone(),
            kind: rejection.error.kind().to_string(),
            error: rejection.error.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    /// Quarantine a valid record that could not be scored.
    pub async fn reject_record(&self, record: &TransactionRecord, error: &PipelineError) -> ScoreFailure {
        self.record(ScoreFailure {
            wallet_address: Some(record.wallet.clone()),
            offset: record.offset,
            checksum: Some(record.checksum.clone()),
            kind: error.kind().to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        })
        .await
    }

    async fn record(&self, failure: ScoreFailure) -> ScoreFailure {
        self.counters.inc_quarantined();
        warn!(
            wallet = failure.wallet_address.as_deref().unwrap_or("-"),
            offset = failure.offset,
            checksum = failure.checksum.as_deref().unwrap_or("-"),
            kind = %failure.kind,
            "Message quarantined: {}",
            failure.error
        );

        if let Some(sink) = &self.sink {
            match serde_json::to_vec(&failure) {
                Ok(payload) => {
                    let key = failure.wallet_address.as_deref().unwrap_or("");
                    if let Err(e) = sink.send(key, &payload).await {
                        warn!(offset = failure.offset, "Dead-letter write failed: {}", e);
                    }
                }
                Err(e) => warn!(offset = failure.offset, "Dead-letter encode failed: {}", e),
            }
        }

        if let Some(db) = &self.db {
            if let Err(e) = db.insert_quarantine(&failure) {
                warn!(offset = failure.offset, "Quarantine insert failed: {}", e);
            }
        }

        failure
    }
}
