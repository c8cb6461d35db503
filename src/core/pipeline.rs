use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::alerts::OpsAlerter;
use crate::core::consumer::{ConsumedBatch, StreamConsumer};
use crate::core::counters::PipelineCounters;
use crate::core::lifecycle::{PipelineState, StateHandle};
use crate::core::quarantine::Quarantine;
use crate::core::TransactionRecord;
use crate::error::PipelineError;
use crate::signals::ScoringEngine;
use crate::sink::publisher::Publisher;
use crate::wallets::{Checkpoint, WalletStore};

/// Everything the coordinator drives.
pub struct PipelineParts {
    pub consumer: StreamConsumer,
    pub engine: Arc<ScoringEngine>,
    pub store: Arc<WalletStore>,
    pub publisher: Arc<Publisher>,
    pub quarantine: Arc<Quarantine>,
    pub alerter: Arc<OpsAlerter>,
    pub counters: Arc<PipelineCounters>,
    pub state: StateHandle,
}

/// Read-only handles shared by the per-wallet workers of a batch.
#[derive(Clone)]
struct Workers {
    engine: Arc<ScoringEngine>,
    store: Arc<WalletStore>,
    publisher: Arc<Publisher>,
    quarantine: Arc<Quarantine>,
    alerter: Arc<OpsAlerter>,
    counters: Arc<PipelineCounters>,
    model_version: Arc<str>,
    slots: Arc<Semaphore>,
}

/// Owns the batch loop: pull, validate, aggregate, score, publish, commit.
pub struct Coordinator {
    consumer: StreamConsumer,
    workers: Workers,
    state: StateHandle,
    drain_timeout: Duration,
}

impl Coordinator {
    pub fn new(parts: PipelineParts, model_version: &str, worker_concurrency: usize, drain_timeout: Duration) -> Self {
        Self {
            consumer: parts.consumer,
            workers: Workers {
                engine: parts.engine,
                store: parts.store,
                publisher: parts.publisher,
                quarantine: parts.quarantine,
                alerter: parts.alerter,
                counters: parts.counters,
                model_version: Arc::from(model_version),
                slots: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            },
            state: parts.state,
            drain_timeout,
        }
    }

    /// Run until `shutdown` flips to true or a dependency fails for good.
    /// Returns the final state: `Stopped` or `Faulted`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> PipelineState {
        if !self.state.transition(PipelineState::Starting) {
            return self.state.get();
        }
        if let Err(e) = self.start().await {
            error!("Pipeline failed to start: {}", e);
            self.state.transition(PipelineState::Faulted);
            return PipelineState::Faulted;
        }
        self.state.transition(PipelineState::Running);
        info!("Pipeline running, consuming from {} event log", self.consumer.kind());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let polled = tokio::select! {
                biased;
                _ = wait_for_stop(&mut shutdown) => break,
                polled = self.consumer.poll_batch() => polled,
            };
            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => return self.fault(e),
            };
            if batch.is_empty() {
                continue;
            }

            let counters = &self.workers.counters;
            counters.add_received(batch.received);
            counters.add_validated(batch.validated());
            counters.add_duplicates(batch.duplicates);
            let ack_offset = batch.ack_offset;
            let checkpoint = self
                .workers
                .store
                .checkpoint(batch.accepted.iter().map(|r| r.wallet.as_str()));

            let mut tasks = JoinSet::new();
            let mut work = Box::pin(process_batch(self.workers.clone(), batch, &mut tasks));
            let finished = tokio::select! {
                _ = &mut work => true,
                _ = wait_for_stop(&mut shutdown) => false,
            };
            if !finished {
                self.state.transition(PipelineState::Draining);
                info!("Stop requested mid-batch, draining for up to {}ms", self.drain_timeout.as_millis());
                if tokio::time::timeout(self.drain_timeout, &mut work).await.is_err() {
                    drop(work);
                    warn!("Drain timeout elapsed, abandoning in-flight batch; it will be redelivered");
                    self.abandon(tasks, checkpoint).await;
                    self.state.transition(PipelineState::Stopped);
                    return PipelineState::Stopped;
                }
            }

            if let Some(offset) = ack_offset {
                if let Err(e) = self.consumer.acknowledge(offset).await {
                    let wallets = self.workers.store.rollback(checkpoint);
                    warn!(wallets, "Rolled back wallet updates of the uncommitted batch");
                    return self.fault(e);
                }
            }
            self.workers.counters.inc_batches(Utc::now());

            if !finished {
                break;
            }
        }

        if self.state.get() == PipelineState::Running {
            self.state.transition(PipelineState::Draining);
        }
        self.state.transition(PipelineState::Stopped);
        info!("Pipeline stopped");
        PipelineState::Stopped
    }

    async fn start(&mut self) -> Result<(), PipelineError> {
        let version = &self.workers.model_version;
        if !self.workers.engine.has_model(version) {
            return Err(PipelineError::UnknownModelVersion(version.to_string()));
        }
        self.consumer.connect().await?;
        self.workers.publisher.ping().await?;
        Ok(())
    }

    /// Stop every worker of an abandoned batch, then undo its wallet
    /// updates so the store matches the committed offset.
    async fn abandon(&self, mut tasks: JoinSet<()>, checkpoint: Checkpoint) {
        tasks.shutdown().await;
        let wallets = self.workers.store.rollback(checkpoint);
        warn!(wallets, "Rolled back wallet updates of the abandoned batch");
    }

    fn fault(&self, e: PipelineError) -> PipelineState {
        error!("Pipeline faulted: {}", e);
        self.state.transition(PipelineState::Faulted);
        PipelineState::Faulted
    }
}

async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop request.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Dispose of every message in a batch. Rejections go to quarantine first;
/// accepted records are grouped per wallet and each group runs on its own
/// task, in (event time, offset) order.
async fn process_batch(workers: Workers, batch: ConsumedBatch, tasks: &mut JoinSet<()>) {
    for rejection in &batch.rejected {
        workers.quarantine.reject(rejection).await;
    }

    let mut groups: BTreeMap<String, Vec<TransactionRecord>> = BTreeMap::new();
    for record in batch.accepted {
        groups.entry(record.wallet.clone()).or_default().push(record);
    }

    for (_, mut records) in groups {
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.offset.cmp(&b.offset)));
        let permit = match workers.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let w = workers.clone();
        tasks.spawn(async move {
            for record in &records {
                process_record(&w, record).await;
            }
            drop(permit);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!("Wallet worker panicked: {}", e);
            }
        }
    }
}

async fn process_record(w: &Workers, record: &TransactionRecord) {
    let version = record.model_version.as_deref().unwrap_or(&w.model_version);
    if !w.engine.has_model(version) {
        let err = PipelineError::UnknownModelVersion(version.to_string());
        w.quarantine.reject_record(record, &err).await;
        w.alerter.raise(
            err.kind(),
            &format!("model version {version:?} is not loaded (wallet {}, offset {})", record.wallet, record.offset),
        );
        return;
    }

    let features = w.store.upsert(record);
    let score = match w.engine.score(&record.wallet, &features, version, Utc::now()) {
        Ok(score) => score,
        Err(e) => {
            w.quarantine.reject_record(record, &e).await;
            return;
        }
    };
    w.counters.inc_scored();
    debug!(wallet = %record.wallet, offset = record.offset, score = score.score, "Wallet scored");

    match w.publisher.publish(&score).await {
        Ok(ack) => {
            if ack.attempts > 1 {
                info!(wallet = %record.wallet, offset = record.offset, attempts = ack.attempts, "Score delivered after retries");
            }
            w.counters.record_published(record.received_at, Utc::now());
        }
        Err(e) => {
            w.counters.inc_publish_failed();
            error!(wallet = %record.wallet, offset = record.offset, "Score not delivered: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, PipelineConfig, PublisherConfig, SourceConfig};
    use crate::signals::model::ModelRegistry;
    use crate::sink::memory::MemorySink;
    use crate::source::memory::MemoryEventLog;
    use crate::wallets::features::{AggregationParams, WalletFeatures};
    use serde_json::json;
    use tokio::task::JoinHandle;

    const ALICE: &str = "0x00000000000000000000000000000000000000aa";
    const BOB: &str = "0x00000000000000000000000000000000000000bb";

    struct Harness {
        log: MemoryEventLog,
        sink: MemorySink,
        dead_letter: MemorySink,
        counters: Arc<PipelineCounters>,
        store: Arc<WalletStore>,
        state: StateHandle,
        stop: watch::Sender<bool>,
        handle: Option<JoinHandle<PipelineState>>,
    }

    struct Options {
        drain_timeout: Duration,
        max_attempts: u32,
        worker_concurrency: usize,
        restore: Vec<(String, WalletFeatures)>,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                drain_timeout: Duration::from_secs(5),
                max_attempts: 5,
                worker_concurrency: 4,
                restore: Vec::new(),
            }
        }
    }

    fn start(log: MemoryEventLog, sink: MemorySink, opts: Options) -> Harness {
        let counters = Arc::new(PipelineCounters::new());
        let store = Arc::new(WalletStore::new(8, 0, AggregationParams::default()));
        store.restore(opts.restore);
        let dead_letter = MemorySink::new();
        let state = StateHandle::new();
        let pipeline = PipelineConfig {
            batch_size: 64,
            poll_timeout_ms: 10,
            ..PipelineConfig::default()
        };
        let source = SourceConfig {
            reconnect_attempts: 2,
            reconnect_backoff_ms: 1,
            max_reconnect_backoff_ms: 2,
            ..SourceConfig::default()
        };
        let publisher_config = PublisherConfig {
            max_attempts: opts.max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        let parts = PipelineParts {
            consumer: StreamConsumer::new(Box::new(log.clone()), &pipeline, &source),
            engine: Arc::new(ScoringEngine::new(ModelRegistry::builtin())),
            store: store.clone(),
            publisher: Arc::new(Publisher::new(
                Arc::new(sink.clone()),
                counters.clone(),
                &publisher_config,
                Duration::from_secs(2),
            )),
            quarantine: Arc::new(Quarantine::new(Some(Arc::new(dead_letter.clone())), None, counters.clone())),
            alerter: Arc::new(OpsAlerter::new(&AlertConfig::default(), counters.clone())),
            counters: counters.clone(),
            state: state.clone(),
        };
        let mut coordinator = Coordinator::new(parts, "v1", opts.worker_concurrency, opts.drain_timeout);
        let (stop, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { coordinator.run(rx).await });
        Harness {
            log,
            sink,
            dead_letter,
            counters,
            store,
            state,
            stop,
            handle: Some(handle),
        }
    }

    impl Harness {
        async fn wait_until(&self, what: &str, cond: impl Fn(&Harness) -> bool) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while !cond(self) {
                assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        async fn join(&mut self) -> PipelineState {
            self.handle.take().expect("already joined").await.unwrap()
        }

        /// Wait for every pushed message to be committed, then stop.
        async fn finish(&mut self, expected_offset: u64) -> PipelineState {
            self.wait_until("commit", |h| h.log.committed() >= expected_offset).await;
            self.stop.send(true).unwrap();
            self.join().await
        }
    }

    fn tx(wallet: &str, tx_type: &str, amount: &str, ts: i64) -> serde_json::Value {
        json!({
            "wallet_address": wallet,
            "tx_type": tx_type,
            "amount": amount,
            "timestamp": ts,
            "protocol": "uniswap-v3"
        })
    }

    #[tokio::test]
    async fn scenario_a_three_swaps_emit_three_scores() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        log.push_json(&tx(ALICE, "swap", "200", 1_700_000_100));
        log.push_json(&tx(ALICE, "swap", "300", 1_700_000_200));
        let mut h = start(log, MemorySink::new(), Options::default());
        let state = h.finish(3).await;

        assert_eq!(state, PipelineState::Stopped);
        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 3);
        let mut last_volume = f64::MIN;
        for (i, score) in delivered.iter().enumerate() {
            assert_eq!(score["wallet_address"], ALICE);
            assert_eq!(score["model_version"], "v1");
            assert_eq!(score["transaction_count"], (i + 1) as u64);
            let value = score["score"].as_f64().unwrap();
            assert!((0.0..=1000.0).contains(&value));
            let volume = score["factors"]
                .as_array()
                .unwrap()
                .iter()
                .find(|f| f["name"] == "volume")
                .unwrap()["weighted_score"]
                .as_f64()
                .unwrap();
            assert!(volume >= last_volume);
            last_volume = volume;
        }
        let stats = h.counters.snapshot();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.validated, 3);
        assert_eq!(stats.scored, 3);
        assert_eq!(stats.published, 3);
        assert_eq!(stats.quarantined, 0);
    }

    #[tokio::test]
    async fn scenario_b_negative_amount_is_quarantined() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "-5", 1_700_000_000));
        let mut h = start(log, MemorySink::new(), Options::default());
        h.finish(1).await;

        assert!(h.sink.delivered().is_empty());
        assert_eq!(h.sink.attempts(), 0);
        let stats = h.counters.snapshot();
        assert_eq!(stats.quarantined, 1);
        assert_eq!(stats.scored, 0);
        let dead = h.dead_letter.delivered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0]["kind"], "validation");
        assert!(h.store.get(ALICE).is_none());
    }

    #[tokio::test]
    async fn scenario_c_duplicate_payload_scores_once() {
        let log = MemoryEventLog::new();
        let event = tx(ALICE, "swap", "100", 1_700_000_000);
        log.push_json(&event);
        log.push_json(&event);
        let mut h = start(log, MemorySink::new(), Options::default());
        h.finish(2).await;

        assert_eq!(h.sink.delivered().len(), 1);
        let stats = h.counters.snapshot();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(h.store.get(ALICE).unwrap().tx_count, 1);
    }

    #[tokio::test]
    async fn duplicate_in_a_later_batch_scores_once() {
        let log = MemoryEventLog::new();
        let event = tx(ALICE, "swap", "100", 1_700_000_000);
        log.push_json(&event);
        let mut h = start(log, MemorySink::new(), Options::default());
        h.wait_until("first commit", |h| h.log.committed() >= 1).await;
        h.log.push_json(&event);
        h.finish(2).await;

        assert_eq!(h.sink.delivered().len(), 1);
        assert_eq!(h.counters.snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn scenario_d_transient_sink_failures_then_success() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "lend", "50", 1_700_000_000));
        let sink = MemorySink::new();
        sink.fail_next(3);
        let mut h = start(log, sink, Options::default());
        h.finish(1).await;

        assert_eq!(h.sink.delivered().len(), 1);
        assert_eq!(h.sink.attempts(), 4);
        let stats = h.counters.snapshot();
        assert_eq!(stats.publish_retries, 3);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.publish_failed, 0);
    }

    #[tokio::test]
    async fn exhausted_publish_is_counted_and_pipeline_moves_on() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "1", 1_700_000_000));
        log.push_json(&tx(ALICE, "swap", "2", 1_700_000_001));
        let sink = MemorySink::new();
        sink.fail_next(2);
        let opts = Options {
            max_attempts: 2,
            ..Options::default()
        };
        let mut h = start(log, sink, opts);
        let state = h.finish(2).await;

        assert_eq!(state, PipelineState::Stopped);
        let stats = h.counters.snapshot();
        assert_eq!(stats.publish_failed, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(h.sink.delivered()[0]["transaction_count"], 2);
    }

    #[tokio::test]
    async fn scenario_e_drain_timeout_abandons_batch() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        log.push_json(&tx(BOB, "borrow", "10", 1_700_000_000));
        let sink = MemorySink::new();
        sink.set_delay(Duration::from_millis(1_000));
        let opts = Options {
            drain_timeout: Duration::from_millis(200),
            ..Options::default()
        };
        let mut h = start(log, sink, opts);
        h.wait_until("both scored", |h| h.counters.snapshot().scored == 2).await;

        h.stop.send(true).unwrap();
        h.wait_until("draining", |h| h.state.get() == PipelineState::Draining).await;
        assert!(h.state.get().is_healthy());

        let final_state = h.join().await;
        assert_eq!(final_state, PipelineState::Stopped);
        assert!(!h.state.get().is_healthy());
        // abandoned: nothing committed, nothing published, no wallet kept
        assert_eq!(h.log.committed(), 0);
        assert_eq!(h.counters.snapshot().published, 0);
        assert_eq!(h.counters.snapshot().scored, 2);
        for wallet in [ALICE, BOB] {
            assert!(h.store.get(wallet).is_none());
        }
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn abandoned_batch_replays_without_double_counting() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        let sink = MemorySink::new();
        let opts = Options {
            drain_timeout: Duration::from_millis(200),
            ..Options::default()
        };
        let mut h = start(log, sink.clone(), opts);
        h.wait_until("first batch committed", |h| h.log.committed() >= 1).await;

        sink.set_delay(Duration::from_millis(1_000));
        h.log.push_json(&tx(ALICE, "swap", "200", 1_700_000_100));
        h.log.push_json(&tx(BOB, "borrow", "10", 1_700_000_100));
        h.wait_until("second batch scored", |h| h.counters.snapshot().scored == 3).await;
        h.stop.send(true).unwrap();
        assert_eq!(h.join().await, PipelineState::Stopped);

        assert_eq!(h.log.committed(), 1);
        assert_eq!(h.store.get(ALICE).unwrap().tx_count, 1);
        assert!(h.store.get(BOB).is_none());

        // restart from the persisted vectors; the uncommitted tail is redelivered
        let opts = Options {
            restore: h.store.snapshot(),
            ..Options::default()
        };
        let mut restarted = start(h.log.clone(), MemorySink::new(), opts);
        restarted.finish(3).await;
        assert_eq!(restarted.store.get(ALICE).unwrap().tx_count, 2);
        assert_eq!(restarted.store.get(BOB).unwrap().tx_count, 1);
        assert_eq!(restarted.sink.delivered().len(), 2);
    }

    #[tokio::test]
    async fn commit_failure_while_draining_faults() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        log.fail_commits(1);
        let sink = MemorySink::new();
        sink.set_delay(Duration::from_millis(500));
        let mut h = start(log, sink, Options::default());
        h.wait_until("scored", |h| h.counters.snapshot().scored == 1).await;

        h.stop.send(true).unwrap();
        assert_eq!(h.join().await, PipelineState::Faulted);
        assert_eq!(h.state.get(), PipelineState::Faulted);
        assert_eq!(h.log.committed(), 0);
        assert!(h.store.get(ALICE).is_none());
    }

    #[tokio::test]
    async fn drain_completes_in_flight_batch() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        let sink = MemorySink::new();
        sink.set_delay(Duration::from_millis(100));
        let mut h = start(log, sink, Options::default());
        h.wait_until("scored", |h| h.counters.snapshot().scored == 1).await;

        h.stop.send(true).unwrap();
        let final_state = h.join().await;
        assert_eq!(final_state, PipelineState::Stopped);
        assert_eq!(h.log.committed(), 1);
        assert_eq!(h.sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn malformed_message_does_not_block_batch() {
        let log = MemoryEventLog::new();
        log.push(b"{\"wallet_address\": 12".to_vec());
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        log.push_json(&json!({"wallet_address": BOB, "tx_type": "teleport", "amount": "1", "timestamp": 1_700_000_000, "protocol": "x"}));
        log.push_json(&tx(BOB, "repay", "5", 1_700_000_000));
        let mut h = start(log, MemorySink::new(), Options::default());
        h.finish(4).await;

        let stats = h.counters.snapshot();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.quarantined, 2);
        assert_eq!(stats.published, 2);
        assert_eq!(h.dead_letter.delivered().len(), 2);
    }

    #[tokio::test]
    async fn unknown_model_version_is_quarantined_with_alert() {
        let log = MemoryEventLog::new();
        let mut event = tx(ALICE, "swap", "100", 1_700_000_000);
        event["model_version"] = json!("v9");
        log.push_json(&event);
        log.push_json(&tx(BOB, "swap", "100", 1_700_000_000));
        let mut h = start(log, MemorySink::new(), Options::default());
        h.finish(2).await;

        let stats = h.counters.snapshot();
        assert_eq!(stats.quarantined, 1);
        assert_eq!(stats.alerts, 1);
        assert_eq!(stats.published, 1);
        assert!(h.store.get(ALICE).is_none());
        assert_eq!(h.dead_letter.delivered()[0]["kind"], "unknown_model_version");
    }

    #[tokio::test]
    async fn same_wallet_records_apply_in_event_time_order() {
        let log = MemoryEventLog::new();
        // arrival order differs from event order
        log.push_json(&tx(ALICE, "swap", "300", 1_700_000_200));
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        log.push_json(&tx(ALICE, "liquidation", "5", 1_700_000_100));
        let mut h = start(log, MemorySink::new(), Options::default());
        h.finish(3).await;

        let delivered = h.sink.delivered();
        let counts: Vec<u64> = delivered.iter().map(|s| s["transaction_count"].as_u64().unwrap()).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(!delivered[0]["tags"].as_array().unwrap().contains(&json!("liquidated")));
        assert!(delivered[1]["tags"].as_array().unwrap().contains(&json!("liquidated")));
    }

    #[tokio::test]
    async fn many_wallets_score_deterministically() {
        let build = || {
            let log = MemoryEventLog::new();
            for i in 0..40u64 {
                let wallet = format!("0x{:040x}", i % 8);
                let kind = ["swap", "lend", "borrow", "repay"][(i % 4) as usize];
                log.push_json(&tx(&wallet, kind, &format!("{}", i * 10), 1_700_000_000 + i as i64 * 3600));
            }
            log
        };
        let serial_opts = Options {
            worker_concurrency: 1,
            ..Options::default()
        };
        let mut serial = start(build(), MemorySink::new(), serial_opts);
        serial.finish(40).await;
        let parallel_opts = Options {
            worker_concurrency: 8,
            ..Options::default()
        };
        let mut parallel = start(build(), MemorySink::new(), parallel_opts);
        parallel.finish(40).await;

        assert_eq!(serial.store.len(), 8);
        for i in 0..8u64 {
            let wallet = format!("0x{i:040x}");
            assert_eq!(serial.store.get(&wallet), parallel.store.get(&wallet));
        }
    }

    #[tokio::test]
    async fn unreachable_event_log_faults_on_start() {
        let log = MemoryEventLog::new();
        log.fail_connects(10);
        let mut h = start(log, MemorySink::new(), Options::default());
        let final_state = h.join().await;
        assert_eq!(final_state, PipelineState::Faulted);
        assert_eq!(h.state.get(), PipelineState::Faulted);
    }

    #[tokio::test]
    async fn unreachable_sink_faults_on_start() {
        let sink = MemorySink::new();
        sink.set_unreachable();
        let mut h = start(MemoryEventLog::new(), sink, Options::default());
        assert_eq!(h.join().await, PipelineState::Faulted);
    }

    #[tokio::test]
    async fn lost_event_log_faults_while_running() {
        let log = MemoryEventLog::new();
        log.push_json(&tx(ALICE, "swap", "100", 1_700_000_000));
        let mut h = start(log, MemorySink::new(), Options::default());
        h.wait_until("commit", |h| h.log.committed() >= 1).await;
        h.log.fail_connects(10);
        h.log.fail_polls(1);

        assert_eq!(h.join().await, PipelineState::Faulted);
        assert_eq!(h.counters.snapshot().published, 1);
    }

    #[tokio::test]
    async fn stop_while_idle_stops_cleanly() {
        let mut h = start(MemoryEventLog::new(), MemorySink::new(), Options::default());
        h.wait_until("running", |h| h.state.get() == PipelineState::Running).await;
        assert!(h.state.get().is_healthy());
        h.stop.send(true).unwrap();
        assert_eq!(h.join().await, PipelineState::Stopped);
    }
}
