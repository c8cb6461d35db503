use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::error;

use crate::config::AlertConfig;
use crate::core::counters::PipelineCounters;

/// Operational alerts for misconfiguration, throttled by a cooldown.
/// Every alert is counted; only the first in each cooldown window is logged.
pub struct OpsAlerter {
    enabled: bool,
    cooldown: Duration,
    last_sent: Mutex<Option<Instant>>,
    counters: Arc<PipelineCounters>,
}

impl OpsAlerter {
    pub fn new(config: &AlertConfig, counters: Arc<PipelineCounters>) -> Self {
        Self {
            enabled: config.enabled,
            cooldown: Duration::from_secs(config.cooldown_seconds),
            last_sent: Mutex::new(None),
            counters,
        }
    }

    /// Raise an alert. Returns true if it was logged, false if throttled.
    pub fn raise(&self, kind: &str, message: &str) -> bool {
        self.counters.inc_alerts();
        if !self.enabled || !self.check_cooldown() {
            return false;
        }
        error!(alert = true, kind, "{}", message);
        true
    }

    /// Check and update cooldown. Returns true if enough time has passed.
    fn check_cooldown(&self) -> bool {
        let mut last = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.cooldown {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}
