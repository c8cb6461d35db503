use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::ScoreSink;
use crate::error::SinkError;

/// Appends one JSON document per line, flushed per message.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    fn open(&self) -> std::io::Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        info!("Writing output to: {}", self.path.display());
        Ok(BufWriter::new(file))
    }

    fn write_line(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("file sink lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let result = match guard.as_mut() {
            Some(writer) => writer
                .write_all(payload)
                .and_then(|_| writer.write_all(b"\n"))
                .and_then(|_| writer.flush()),
            None => Err(std::io::Error::other("file sink not open")),
        };
        if result.is_err() {
            // Reopen on the next attempt.
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl ScoreSink for FileSink {
    async fn ping(&self) -> Result<(), SinkError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| SinkError::Permanent("file sink lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        Ok(())
    }

    async fn send(&self, _key: &str, payload: &[u8]) -> Result<(), SinkError> {
        Ok(self.write_line(payload)?)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
