//! Per-wallet running features.
//!
//! Wallets hash into a fixed number of shards, each behind its own lock, so
//! updates to different wallets rarely contend and one wallet's update is
//! applied entirely under a single lock acquisition.

pub mod features;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::core::TransactionRecord;
pub use features::{AggregationParams, WalletFeatures};

struct Entry {
    features: WalletFeatures,
    touched: u64,
}

#[derive(Default)]
struct Shard {
    entries: HashMap<String, Entry>,
    /// Touch stamp to wallet, oldest first.
    order: BTreeMap<u64, String>,
}

impl Shard {
    fn insert(&mut self, wallet: String, features: WalletFeatures, touched: u64) {
        self.order.insert(touched, wallet.clone());
        if let Some(old) = self.entries.insert(wallet, Entry { features, touched }) {
            self.order.remove(&old.touched);
        }
    }

    fn touch(&mut self, wallet: &str, touched: u64) -> Option<&mut Entry> {
        let entry = self.entries.get_mut(wallet)?;
        self.order.remove(&entry.touched);
        self.order.insert(touched, wallet.to_string());
        entry.touched = touched;
        Some(entry)
    }

    fn oldest_except(&self, keep: &str) -> Option<u64> {
        self.order
            .iter()
            .find(|(_, wallet)| wallet.as_str() != keep)
            .map(|(touched, _)| *touched)
    }

    fn remove(&mut self, wallet: &str) -> bool {
        match self.entries.remove(wallet) {
            Some(entry) => {
                self.order.remove(&entry.touched);
                true
            }
            None => false,
        }
    }

    /// Remove the wallet stamped `touched`, if it has not been touched since.
    fn remove_stamp(&mut self, touched: u64) -> Option<String> {
        let wallet = self.order.remove(&touched)?;
        self.entries.remove(&wallet);
        Some(wallet)
    }
}

/// Vectors of a set of wallets as they stood before a batch, so the batch
/// can be undone if it is never committed. `None` marks a wallet that was
/// not tracked.
#[derive(Debug, Default)]
pub struct Checkpoint {
    entries: Vec<(String, Option<WalletFeatures>)>,
}

pub struct WalletStore {
    shards: Vec<Mutex<Shard>>,
    /// `None` when unbounded.
    capacity: Option<usize>,
    params: AggregationParams,
    clock: AtomicU64,
    tracked: AtomicUsize,
    evicted: AtomicU64,
}

impl WalletStore {
    /// `capacity == 0` disables eviction. Otherwise the store evicts the
    /// least-recently-updated wallet, whatever its shard, once the total
    /// exceeds `capacity`.
    pub fn new(shards: usize, capacity: usize, params: AggregationParams) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            capacity: (capacity > 0).then_some(capacity),
            params,
            clock: AtomicU64::new(0),
            tracked: AtomicUsize::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Fold `record` into its wallet's vector and return the updated copy.
    pub fn upsert(&self, record: &TransactionRecord) -> WalletFeatures {
        let touched = self.clock.fetch_add(1, Ordering::Relaxed);
        let features = {
            let mut shard = self.shard_for(&record.wallet);
            if let Some(entry) = shard.touch(&record.wallet, touched) {
                entry.features.apply(record, &self.params);
                return entry.features.clone();
            }
            let features = WalletFeatures::from_first(record, &self.params);
            shard.insert(record.wallet.clone(), features.clone(), touched);
            self.tracked.fetch_add(1, Ordering::AcqRel);
            features
        };

        if let Some(cap) = self.capacity {
            self.evict_over(cap, &record.wallet);
        }
        features
    }

    #[cfg(test)]
    pub fn get(&self, wallet: &str) -> Option<WalletFeatures> {
        self.shard_for(wallet)
            .entries
            .get(wallet)
            .map(|e| e.features.clone())
    }

    pub fn len(&self) -> usize {
        self.tracked.load(Ordering::Acquire)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Copy of every tracked wallet, ordered by address.
    pub fn snapshot(&self) -> Vec<(String, WalletFeatures)> {
        let mut all: Vec<(String, WalletFeatures)> = self
            .shards
            .iter()
            .flat_map(|s| {
                lock(s)
                    .entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.features.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn checkpoint<'a>(&self, wallets: impl IntoIterator<Item = &'a str>) -> Checkpoint {
        let mut entries: Vec<(String, Option<WalletFeatures>)> = Vec::new();
        for wallet in wallets {
            if entries.iter().any(|(w, _)| w == wallet) {
                continue;
            }
            let features = self.shard_for(wallet).entries.get(wallet).map(|e| e.features.clone());
            entries.push((wallet.to_string(), features));
        }
        Checkpoint { entries }
    }

    /// Put every wallet in `checkpoint` back the way it was. Returns the
    /// number of wallets restored or dropped.
    pub fn rollback(&self, checkpoint: Checkpoint) -> usize {
        let restored = checkpoint.entries.len();
        for (wallet, saved) in checkpoint.entries {
            let mut shard = self.shard_for(&wallet);
            match saved {
                Some(features) => {
                    let is_new = !shard.entries.contains_key(&wallet);
                    let touched = self.clock.fetch_add(1, Ordering::Relaxed);
                    shard.insert(wallet, features, touched);
                    if is_new {
                        self.tracked.fetch_add(1, Ordering::AcqRel);
                    }
                }
                None => {
                    if shard.remove(&wallet) {
                        self.tracked.fetch_sub(1, Ordering::AcqRel);
                    }
                }
            }
        }
        if let Some(cap) = self.capacity {
            self.evict_over(cap, "");
        }
        restored
    }

    /// Load previously persisted vectors, respecting capacity.
    pub fn restore(&self, entries: impl IntoIterator<Item = (String, WalletFeatures)>) -> usize {
        let mut loaded = 0;
        for (wallet, features) in entries {
            let touched = self.clock.fetch_add(1, Ordering::Relaxed);
            let mut shard = self.shard_for(&wallet);
            let is_new = !shard.entries.contains_key(&wallet);
            if is_new && self.capacity.is_some_and(|cap| self.len() >= cap) {
                continue;
            }
            shard.insert(wallet, features, touched);
            if is_new {
                self.tracked.fetch_add(1, Ordering::AcqRel);
            }
            loaded += 1;
        }
        loaded
    }

    fn shard_for(&self, wallet: &str) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        wallet.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        lock(&self.shards[idx])
    }

    /// Evict least-recently-updated wallets until the total is back at `cap`.
    /// Shards are locked one at a time; `keep` is the wallet just inserted.
    fn evict_over(&self, cap: usize, keep: &str) {
        while self.len() > cap {
            let victim = self
                .shards
                .iter()
                .enumerate()
                .filter_map(|(idx, s)| lock(s).oldest_except(keep).map(|touched| (touched, idx)))
                .min();
            let Some((touched, idx)) = victim else {
                break;
            };
            // Lost a race with a concurrent touch or eviction: look again.
            if let Some(wallet) = lock(&self.shards[idx]).remove_stamp(touched) {
                tracing::debug!(wallet = %wallet, "Evicting least-recently-updated wallet");
                self.tracked.fetch_sub(1, Ordering::AcqRel);
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// A panic while holding a shard lock cannot leave an entry half-applied, so
// a poisoned lock is still safe to use.
fn lock(shard: &Mutex<Shard>) -> MutexGuard<'_, Shard> {
    shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
