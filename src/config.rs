use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub scoring: ScoringConfig,
    pub wallet_state: WalletStateConfig,
    pub sink: SinkConfig,
    pub dead_letter: SinkConfig,
    pub publisher: PublisherConfig,
    pub alerts: AlertConfig,
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: String,
    pub path: String,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub max_reconnect_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub poll_timeout_ms: u64,
    pub worker_concurrency: usize,
    pub drain_timeout_ms: u64,
    pub max_clock_skew_secs: i64,
    pub dedup_window_secs: i64,
    pub dedup_max_entries: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub model_version: String,
    pub models: Vec<ModelConfig>,
}

/// An extra parameter table declared in config. Unset fields inherit v1.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ModelConfig {
    pub version: String,
    pub weights: BTreeMap<String, f64>,
    pub volume_midpoint: Option<f64>,
    pub volume_cap: Option<f64>,
    pub activity_midpoint: Option<f64>,
    pub diversity_midpoint: Option<f64>,
    pub longevity_midpoint_days: Option<f64>,
    pub recency_midpoint: Option<f64>,
    pub liquidation_midpoint: Option<f64>,
    pub trader_min_swaps: Option<u64>,
    pub trader_min_active_days: Option<u32>,
    pub lender_min_lends: Option<u64>,
    pub lender_min_active_days: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WalletStateConfig {
    /// Maximum tracked wallets; 0 disables eviction.
    pub capacity: usize,
    pub shards: usize,
    pub activity_half_life_secs: i64,
    pub max_tracked_protocols: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: String,
    /// File sinks only. Unset means the role's default path.
    pub path: Option<String>,
    pub url: Option<String>,
    pub auth_user: Option<String>,
    pub auth_password: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PublisherConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: "file".into(),
            path: "data/transactions.jsonl".into(),
            reconnect_attempts: 5,
            reconnect_backoff_ms: 200,
            max_reconnect_backoff_ms: 5_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            poll_timeout_ms: 1_000,
            worker_concurrency: 8,
            drain_timeout_ms: 10_000,
            max_clock_skew_secs: 300,
            dedup_window_secs: 600,
            dedup_max_entries: 100_000,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_version: "v1".into(),
            models: Vec::new(),
        }
    }
}

impl Default for WalletStateConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            shards: 64,
            activity_half_life_secs: 7 * 24 * 3600,
            max_tracked_protocols: 64,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "file".into(),
            path: None,
            url: None,
            auth_user: None,
            auth_password: None,
            timeout_ms: 5_000,
        }
    }
}

impl SinkConfig {
    pub fn path_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.path.as_deref().unwrap_or(default)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: 60,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".into(),
        }
    }
}

/// Upper bound on `pipeline.max_clock_skew_secs` (one week).
pub const MAX_CLOCK_SKEW_SECS: i64 = 7 * 86_400;
/// Upper bound on `pipeline.dedup_window_secs` (thirty days).
pub const MAX_DEDUP_WINDOW_SECS: i64 = 30 * 86_400;

impl PipelineConfig {
    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs.clamp(0, MAX_CLOCK_SKEW_SECS))
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dedup_window_secs.clamp(1, MAX_DEDUP_WINDOW_SECS))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if !path.exists() {
            Self::default()
        } else {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `REPSCORE_*` overrides. The lookup is injected so tests never touch
    /// the process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("REPSCORE_SOURCE_PATH") {
            self.source.path = path;
        }
        if let Some(url) = lookup("REPSCORE_SINK_URL") {
            self.sink.kind = "http".into();
            self.sink.url = Some(url);
        }
        if let Some(bind) = lookup("REPSCORE_HTTP_ADDR") {
            self.http.bind = bind;
        }
        if let Some(version) = lookup("REPSCORE_MODEL_VERSION") {
            self.scoring.model_version = version;
        }
        if let Some(path) = lookup("REPSCORE_DATABASE_PATH") {
            self.database.path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.pipeline.batch_size == 0 {
            return invalid("pipeline.batch_size must be > 0");
        }
        if self.pipeline.worker_concurrency == 0 {
            return invalid("pipeline.worker_concurrency must be > 0");
        }
        if !(0..=MAX_CLOCK_SKEW_SECS).contains(&self.pipeline.max_clock_skew_secs) {
            return invalid("pipeline.max_clock_skew_secs must be between 0 and 604800");
        }
        if !(1..=MAX_DEDUP_WINDOW_SECS).contains(&self.pipeline.dedup_window_secs) {
            return invalid("pipeline.dedup_window_secs must be between 1 and 2592000");
        }
        if self.pipeline.dedup_max_entries == 0 {
            return invalid("pipeline.dedup_max_entries must be > 0");
        }
        if self.wallet_state.shards == 0 {
            return invalid("wallet_state.shards must be > 0");
        }
        if self.wallet_state.activity_half_life_secs <= 0 {
            return invalid("wallet_state.activity_half_life_secs must be > 0");
        }
        if self.publisher.max_attempts == 0 {
            return invalid("publisher.max_attempts must be > 0");
        }
        if self.publisher.initial_backoff_ms > self.publisher.max_backoff_ms {
            return invalid("publisher.initial_backoff_ms exceeds max_backoff_ms");
        }
        if self.source.reconnect_backoff_ms > self.source.max_reconnect_backoff_ms {
            return invalid("source.reconnect_backoff_ms exceeds max_reconnect_backoff_ms");
        }
        if self.scoring.model_version.trim().is_empty() {
            return invalid("scoring.model_version must not be empty");
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return invalid("logging.format must be \"pretty\" or \"json\"");
        }
        for sink in [&self.sink, &self.dead_letter] {
            if sink.kind == "http" && sink.url.is_none() {
                return invalid("http sink requires a url");
            }
        }
        Ok(())
    }
}
