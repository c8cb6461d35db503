use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::EventLog;
use crate::core::RawMessage;
use crate::error::SourceError;

#[derive(Default)]
struct Inner {
    messages: Vec<Vec<u8>>,
    cursor: usize,
    committed: u64,
    connected: bool,
    connect_failures: u32,
    poll_failures: u32,
    commit_failures: u32,
}

/// In-process event log. Clones share state, so a test can keep a handle
/// after moving one into the pipeline.
#[derive(Clone, Default)]
pub struct MemoryEventLog {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: impl Into<Vec<u8>>) {
        self.inner.lock().unwrap().messages.push(payload.into());
    }

    pub fn push_json(&self, value: &serde_json::Value) {
        self.push(serde_json::to_vec(value).unwrap());
    }

    pub fn committed(&self) -> u64 {
        self.inner.lock().unwrap().committed
    }

    pub fn fail_connects(&self, n: u32) {
        self.inner.lock().unwrap().connect_failures = n;
    }

    pub fn fail_polls(&self, n: u32) {
        self.inner.lock().unwrap().poll_failures = n;
    }

    pub fn fail_commits(&self, n: u32) {
        self.inner.lock().unwrap().commit_failures = n;
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.connect_failures > 0 {
            inner.connect_failures -= 1;
            return Err(SourceError::Unavailable("connection refused".into()));
        }
        inner.connected = true;
        inner.cursor = inner.committed as usize;
        Ok(())
    }

    async fn poll_batch(
        &mut self,
        max_items: usize,
        max_wait: Duration,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let batch = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.connected {
                return Err(SourceError::NotConnected);
            }
            if inner.poll_failures > 0 {
                inner.poll_failures -= 1;
                inner.connected = false;
                return Err(SourceError::Unavailable("broker went away".into()));
            }
            let start = inner.cursor;
            let end = (start + max_items).min(inner.messages.len());
            let received_at = Utc::now();
            let batch: Vec<RawMessage> = (start..end)
                .map(|i| RawMessage {
                    offset: i as u64,
                    next_offset: i as u64 + 1,
                    payload: inner.messages[i].clone(),
                    received_at,
                })
                .collect();
            inner.cursor = end;
            batch
        };
        if batch.is_empty() {
            tokio::time::sleep(max_wait).await;
        }
        Ok(batch)
    }

    async fn commit(&mut self, next_offset: u64) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.commit_failures > 0 {
            inner.commit_failures -= 1;
            return Err(SourceError::Unavailable("commit rejected".into()));
        }
        inner.committed = inner.committed.max(next_offset);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
