//! JSONL event log: one event per line, appended by the upstream producer.
//!
//! An entry's offset is its byte position. The committed position lives in a
//! sidecar `<path>.offset` file so a restart resumes where the last
//! acknowledged batch ended.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use super::EventLog;
use crate::core::RawMessage;
use crate::error::SourceError;

pub struct FileEventLog {
    path: PathBuf,
    offset_path: PathBuf,
    reader: Option<BufReader<File>>,
    position: u64,
    committed: u64,
    poll_interval: Duration,
}

impl FileEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut offset_path = path.clone().into_os_string();
        offset_path.push(".offset");
        Self {
            path,
            offset_path: PathBuf::from(offset_path),
            reader: None,
            position: 0,
            committed: 0,
            poll_interval: Duration::from_millis(50),
        }
    }

    #[cfg(test)]
    pub fn committed(&self) -> u64 {
        self.committed
    }

    async fn read_committed(path: &Path) -> Result<u64, SourceError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents.trim().parse().map_err(|e| {
                SourceError::Unavailable(format!("corrupt offset file {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn connect(&mut self) -> Result<(), SourceError> {
        self.committed = Self::read_committed(&self.offset_path).await?;
        let file = File::open(&self.path).await.map_err(|e| {
            SourceError::Unavailable(format!("cannot open {}: {e}", self.path.display()))
        })?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.committed)).await?;
        self.reader = Some(reader);
        self.position = self.committed;
        info!(path = %self.path.display(), offset = self.committed, "Event log opened");
        Ok(())
    }

    async fn poll_batch(
        &mut self,
        max_items: usize,
        max_wait: Duration,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let deadline = Instant::now() + max_wait;
        let mut batch = Vec::new();

        loop {
            let reader = self.reader.as_mut().ok_or(SourceError::NotConnected)?;
            while batch.len() < max_items {
                let mut line = Vec::new();
                let n = reader.read_until(b'\n', &mut line).await?;
                if n == 0 {
                    break;
                }
                if line.last() != Some(&b'\n') {
                    // Producer is mid-write; re-read the whole line next time.
                    reader.seek(SeekFrom::Start(self.position)).await?;
                    break;
                }
                let offset = self.position;
                self.position += n as u64;
                let payload = line.trim_ascii();
                if payload.is_empty() {
                    continue;
                }
                batch.push(RawMessage {
                    offset,
                    next_offset: self.position,
                    payload: payload.to_vec(),
                    received_at: Utc::now(),
                });
            }

            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                if !batch.is_empty() {
                    debug!(count = batch.len(), position = self.position, "Read batch from event log");
                }
                return Ok(batch);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn commit(&mut self, next_offset: u64) -> Result<(), SourceError> {
        if next_offset <= self.committed {
            return Ok(());
        }
        let mut tmp = self.offset_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, next_offset.to_string()).await?;
        tokio::fs::rename(&tmp, &self.offset_path).await?;
        self.committed = next_offset;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
