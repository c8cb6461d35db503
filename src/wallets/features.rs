use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{TransactionRecord, TxType};

const SECS_PER_DAY: i64 = 86_400;

/// Knobs for folding a record into a feature vector.
#[derive(Debug, Clone)]
pub struct AggregationParams {
    pub activity_half_life_secs: i64,
    pub max_tracked_protocols: usize,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            activity_half_life_secs: 7 * SECS_PER_DAY,
            max_tracked_protocols: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub swap: u64,
    pub lend: u64,
    pub borrow: u64,
    pub repay: u64,
    pub liquidation: u64,
    pub other: u64,
}

impl TypeCounts {
    fn bump(&mut self, tx_type: TxType) {
        let slot = match tx_type {
            TxType::Swap => &mut self.swap,
            TxType::Lend => &mut self.lend,
            TxType::Borrow => &mut self.borrow,
            TxType::Repay => &mut self.repay,
            TxType::Liquidation => &mut self.liquidation,
            TxType::Other => &mut self.other,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Running per-wallet aggregate. Always built from at least one record, so
/// `tx_count >= 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletFeatures {
    pub tx_count: u64,
    pub type_counts: TypeCounts,
    pub total_volume: Decimal,
    pub protocols: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active_days: u32,
    pub last_active_day: i64,
    pub activity_weight: f64,
}

impl WalletFeatures {
    pub fn from_first(record: &TransactionRecord, params: &AggregationParams) -> Self {
        let mut type_counts = TypeCounts::default();
        type_counts.bump(record.tx_type);
        let mut protocols = BTreeSet::new();
        if params.max_tracked_protocols > 0 {
            protocols.insert(record.protocol.clone());
        }
        Self {
            tx_count: 1,
            type_counts,
            total_volume: record.amount,
            protocols,
            first_seen: record.timestamp,
            last_seen: record.timestamp,
            active_days: 1,
            last_active_day: day_index(record.timestamp),
            activity_weight: 1.0,
        }
    }

    /// Fold one more record into the aggregate.
    pub fn apply(&mut self, record: &TransactionRecord, params: &AggregationParams) {
        self.tx_count = self.tx_count.saturating_add(1);
        self.type_counts.bump(record.tx_type);
        self.total_volume = self
            .total_volume
            .checked_add(record.amount)
            .unwrap_or(Decimal::MAX);

        if self.protocols.len() < params.max_tracked_protocols {
            self.protocols.insert(record.protocol.clone());
        }

        // Out-of-order events decay nothing.
        let gap_secs = (record.timestamp - self.last_seen).num_seconds().max(0) as f64;
        let half_life = params.activity_half_life_secs.max(1) as f64;
        self.activity_weight = self.activity_weight * 0.5f64.powf(gap_secs / half_life) + 1.0;

        let day = day_index(record.timestamp);
        if day > self.last_active_day {
            self.active_days = self.active_days.saturating_add(1);
            self.last_active_day = day;
        }

        if record.timestamp < self.first_seen {
            self.first_seen = record.timestamp;
        }
        if record.timestamp > self.last_seen {
            self.last_seen = record.timestamp;
        }
    }

    pub fn distinct_protocols(&self) -> usize {
        self.protocols.len()
    }

    pub fn longevity_days(&self) -> f64 {
        (self.last_seen - self.first_seen).num_seconds().max(0) as f64 / SECS_PER_DAY as f64
    }
}

fn day_index(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(SECS_PER_DAY)
}
