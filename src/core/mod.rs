pub mod consumer;
pub mod counters;
pub mod dedup;
pub mod lifecycle;
pub mod pipeline;
pub mod quarantine;
pub mod tx;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One entry pulled from the event log, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Position in the log; strictly increasing in arrival order.
    pub offset: u64,
    /// Offset to commit once this message has been disposed of.
    pub next_offset: u64,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Swap,
    Lend,
    Borrow,
    Repay,
    Liquidation,
    Other,
}

/// A validated DeFi event. Only built by [`tx::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub wallet: String,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub chain: Option<String>,
    pub checksum: String,
    pub model_version: Option<String>,
    pub offset: u64,
    pub received_at: DateTime<Utc>,
}

/// A named contribution to the final score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub name: String,
    pub raw_value: f64,
    pub weight: f64,
    pub weighted_score: f64,
}

/// Outbound score message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationScore {
    pub wallet_address: String,
    pub score: f64, // 0-1000
    pub factors: Vec<FactorScore>,
    pub model_version: String,
    pub computed_at: DateTime<Utc>,
    pub transaction_count: u64,
    pub tags: Vec<String>,
}

#[cfg(test)]
impl ReputationScore {
    /// Equality ignoring `computed_at`.
    pub fn same_result(&self, other: &ReputationScore) -> bool {
        self.wallet_address == other.wallet_address
            && self.score == other.score
            && self.factors == other.factors
            && self.model_version == other.model_version
            && self.transaction_count == other.transaction_count
            && self.tags == other.tags
    }

    pub fn factor(&self, name: &str) -> Option<&FactorScore> {
        self.factors.iter().find(|f| f.name == name)
    }
}

/// Dead-letter record for a quarantined message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFailure {
    pub wallet_address: Option<String>,
    pub offset: u64,
    pub checksum: Option<String>,
    pub kind: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}
