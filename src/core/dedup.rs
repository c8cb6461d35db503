use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

/// Recently processed payload checksums.
///
/// Entries expire after `window` (measured against ingestion time) and the
/// oldest are dropped once `max_entries` is reached.
#[derive(Debug)]
pub struct DedupWindow {
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(DateTime<Utc>, String)>,
    window: Duration,
    max_entries: usize,
}

impl DedupWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            seen: HashMap::new(),
            order: VecDeque::new(),
            window: window.max(Duration::zero()),
            max_entries: max_entries.max(1),
        }
    }

    /// Record `checksum` as seen at `now`. Returns false if it was already
    /// inside the window.
    pub fn check_and_insert(&mut self, checksum: &str, now: DateTime<Utc>) -> bool {
        self.prune_old(now);
        if self.seen.contains_key(checksum) {
            return false;
        }
        while self.seen.len() >= self.max_entries {
            if !self.pop_oldest() {
                break;
            }
        }
        self.seen.insert(checksum.to_string(), now);
        self.order.push_back((now, checksum.to_string()));
        true
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Drop entries older than the window.
    pub fn prune_old(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.window) else {
            return;
        };
        while let Some(seen_at) = self.order.front().map(|(t, _)| *t) {
            if seen_at > cutoff {
                break;
            }
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) -> bool {
        match self.order.pop_front() {
            Some((seen_at, checksum)) => {
                // Only remove if the map still refers to this insertion.
                if self.seen.get(&checksum) == Some(&seen_at) {
                    self.seen.remove(&checksum);
                }
                true
            }
            None => false,
        }
    }
}
