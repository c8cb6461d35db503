//! Output sinks and the retrying publisher in front of them.

pub mod file;
pub mod http;
#[cfg(test)]
pub mod memory;
pub mod publisher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SinkConfig;
use crate::error::{ConfigError, SinkError};

/// Destination for serialized output messages.
#[async_trait]
pub trait ScoreSink: Send + Sync {
    /// Check the sink is reachable.
    async fn ping(&self) -> Result<(), SinkError>;

    /// Deliver one message. `key` is the partitioning key (wallet address).
    async fn send(&self, key: &str, payload: &[u8]) -> Result<(), SinkError>;

    /// Backend type for logging.
    fn kind(&self) -> &'static str;
}

/// Build a sink from its config section. `default_path` applies to file
/// sinks that don't set one.
pub fn build_sink(config: &SinkConfig, default_path: &str) -> Result<Arc<dyn ScoreSink>, ConfigError> {
    match config.kind.as_str() {
        "file" => Ok(Arc::new(file::FileSink::new(config.path_or(default_path)))),
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("http sink requires a url".into()))?;
            let mut sink = http::HttpSink::new(url, Duration::from_millis(config.timeout_ms));
            if let (Some(user), Some(pass)) = (&config.auth_user, &config.auth_password) {
                sink = sink.with_basic_auth(user, pass);
            }
            Ok(Arc::new(sink))
        }
        other => Err(ConfigError::Invalid(format!("unknown sink kind {other:?}"))),
    }
}
