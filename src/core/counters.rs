use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// EWMA smoothing for the latency average.
const LATENCY_ALPHA: f64 = 0.2;

/// Throughput counters. Written by the pipeline, read by the HTTP surface.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    received: AtomicU64,
    validated: AtomicU64,
    quarantined: AtomicU64,
    duplicates: AtomicU64,
    scored: AtomicU64,
    published: AtomicU64,
    publish_failed: AtomicU64,
    publish_retries: AtomicU64,
    alerts: AtomicU64,
    batches: AtomicU64,
    last_processed_at: AtomicI64,
    latency: LatencyGauge,
}

/// Ingestion-to-publish latency in milliseconds.
#[derive(Debug, Default)]
struct LatencyGauge {
    last_ms: AtomicU64,
    max_ms: AtomicU64,
    /// f64 bits of the moving average.
    avg_bits: AtomicU64,
    samples: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub last_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
    pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountersSnapshot {
    pub received: u64,
    pub validated: u64,
    pub quarantined: u64,
    pub duplicates: u64,
    pub scored: u64,
    pub published: u64,
    pub publish_failed: u64,
    pub publish_retries: u64,
    pub alerts: u64,
    pub batches: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub latency: LatencySnapshot,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_validated(&self, n: u64) {
        self.validated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_duplicates(&self, n: u64) {
        self.duplicates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_quarantined(&self) {
        self.quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scored(&self) {
        self.scored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_failed(&self) {
        self.publish_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_publish_retries(&self, n: u64) {
        self.publish_retries.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_alerts(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batches(&self, at: DateTime<Utc>) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.last_processed_at.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Count a successful publish and fold its latency into the gauge.
    pub fn record_published(&self, received_at: DateTime<Utc>, published_at: DateTime<Utc>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let ms = (published_at - received_at).num_milliseconds().max(0) as u64;
        self.latency.record(ms);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let last = self.last_processed_at.load(Ordering::Relaxed);
        CountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            scored: self.scored.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            last_processed_at: if last == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(last)
            },
            latency: self.latency.snapshot(),
        }
    }
}

impl LatencyGauge {
    fn record(&self, ms: u64) {
        self.last_ms.store(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
        let first = self.samples.fetch_add(1, Ordering::Relaxed) == 0;
        let sample = ms as f64;
        let _ = self
            .avg_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let avg = if first {
                    sample
                } else {
                    let prev = f64::from_bits(bits);
                    prev + LATENCY_ALPHA * (sample - prev)
                };
                Some(avg.to_bits())
            });
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            last_ms: self.last_ms.load(Ordering::Relaxed),
            avg_ms: f64::from_bits(self.avg_bits.load(Ordering::Relaxed)),
            max_ms: self.max_ms.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
        }
    }
}
