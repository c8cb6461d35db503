use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{RawMessage, TransactionRecord, TxType};
use crate::error::PipelineError;

/// Fractional digits accepted on `amount`.
pub const MAX_AMOUNT_SCALE: u32 = 18;

/// Inbound event as produced upstream.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    wallet_address: String,
    #[serde(alias = "action")]
    tx_type: TxType,
    amount: Decimal,
    timestamp: WireTimestamp,
    protocol: String,
    #[serde(default)]
    chain: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    UnixSeconds(i64),
    Rfc3339(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub max_clock_skew: Duration,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_clock_skew: Duration::seconds(300),
        }
    }
}

/// A message that failed to become a record, with whatever could be salvaged
/// for the dead-letter entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub offset: u64,
    pub wallet: Option<String>,
    pub checksum: Option<String>,
    pub error: PipelineError,
}

/// Decode and validate one raw message.
pub fn decode(raw: &RawMessage, rules: &ValidationRules) -> Result<TransactionRecord, Rejection> {
    let event: InboundEvent = serde_json::from_slice(&raw.payload).map_err(|e| Rejection {
        offset: raw.offset,
        wallet: wallet_hint(&raw.payload),
        checksum: None,
        error: PipelineError::MalformedMessage(e.to_string()),
    })?;

    let checksum = match event.checksum.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => payload_checksum(&raw.payload),
    };

    let reject = |wallet: Option<String>, reason: String| Rejection {
        offset: raw.offset,
        wallet,
        checksum: Some(checksum.clone()),
        error: PipelineError::Validation(reason),
    };

    let wallet = normalize_address(&event.wallet_address).ok_or_else(|| {
        reject(
            Some(event.wallet_address.clone()),
            format!("invalid wallet address {:?}", event.wallet_address),
        )
    })?;

    if event.amount.is_sign_negative() && !event.amount.is_zero() {
        return Err(reject(Some(wallet), format!("negative amount {}", event.amount)));
    }
    if event.amount.scale() > MAX_AMOUNT_SCALE {
        return Err(reject(
            Some(wallet),
            format!("amount {} has more than {MAX_AMOUNT_SCALE} decimal places", event.amount),
        ));
    }

    let timestamp = match event.timestamp {
        WireTimestamp::UnixSeconds(secs) => match DateTime::from_timestamp(secs, 0) {
            Some(ts) => ts,
            None => return Err(reject(Some(wallet), format!("timestamp {secs} out of range"))),
        },
        WireTimestamp::Rfc3339(ts) => ts,
    };
    // A skew too large to represent puts no bound on the future.
    let skew = rules.max_clock_skew.max(Duration::zero());
    let limit = raw.received_at.checked_add_signed(skew);
    if limit.is_some_and(|limit| timestamp > limit) {
        return Err(reject(
            Some(wallet),
            format!(
                "timestamp {} is more than {}s ahead of ingestion",
                timestamp.to_rfc3339(),
                skew.num_seconds()
            ),
        ));
    }

    let protocol = event.protocol.trim();
    if protocol.is_empty() {
        return Err(reject(Some(wallet), "empty protocol".into()));
    }

    Ok(TransactionRecord {
        wallet,
        tx_type: event.tx_type,
        amount: event.amount.normalize(),
        timestamp,
        protocol: protocol.to_lowercase(),
        chain: event.chain.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty()),
        checksum,
        model_version: event.model_version.filter(|v| !v.trim().is_empty()),
        offset: raw.offset,
        received_at: raw.received_at,
    })
}

/// `0x` + 40 hex digits, returned lower-cased.
pub fn normalize_address(address: &str) -> Option<String> {
    let address = address.trim();
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))?;
    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex_part.to_ascii_lowercase()))
}

/// Lowercase hex SHA-256 of the raw payload.
pub fn payload_checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn wallet_hint(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value.get("wallet_address")?.as_str().map(str::to_string)
}
