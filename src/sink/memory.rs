use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::ScoreSink;
use crate::error::SinkError;

#[derive(Default)]
struct Inner {
    delivered: Vec<(String, Vec<u8>)>,
    attempts: u64,
    transient_failures: u32,
    permanent: bool,
    unreachable: bool,
    delay: Option<Duration>,
}

/// Recording sink with failure injection. Clones share state.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().unwrap().transient_failures = n;
    }

    pub fn fail_permanently(&self) {
        self.inner.lock().unwrap().permanent = true;
    }

    pub fn set_unreachable(&self) {
        self.inner.lock().unwrap().unreachable = true;
    }

    /// Sleep this long inside every send.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = Some(delay);
    }

    pub fn attempts(&self) -> u64 {
        self.inner.lock().unwrap().attempts
    }

    pub fn delivered(&self) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .unwrap()
            .delivered
            .iter()
            .map(|(_, p)| serde_json::from_slice(p).unwrap())
            .collect()
    }
}

#[async_trait]
impl ScoreSink for MemorySink {
    async fn ping(&self) -> Result<(), SinkError> {
        if self.inner.lock().unwrap().unreachable {
            return Err(SinkError::Transient("sink unreachable".into()));
        }
        Ok(())
    }

    async fn send(&self, key: &str, payload: &[u8]) -> Result<(), SinkError> {
        let delay = self.inner.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if inner.permanent {
            return Err(SinkError::Permanent("rejected".into()));
        }
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(SinkError::Transient("temporarily unavailable".into()));
        }
        inner.delivered.push((key.to_string(), payload.to_vec()));
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
