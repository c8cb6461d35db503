//! Error types shared across the pipeline.

use thiserror::Error;

/// Pipeline error taxonomy. Everything except `DependencyUnavailable`
/// after exhausted retries is handled per message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Payload did not deserialize into an inbound event.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Well-formed event that violates a record invariant.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No parameter table loaded for the requested model version.
    #[error("unknown model version: {0}")]
    UnknownModelVersion(String),

    /// Event log or output sink unreachable.
    #[error("dependency unavailable: {dependency}: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    /// Publishing gave up after the configured attempts.
    #[error("publish failed after {attempts} attempt(s): {reason}")]
    Publish { attempts: u32, reason: String },
}

impl PipelineError {
    pub fn dependency(dependency: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable name used in dead-letter records.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedMessage(_) => "malformed_message",
            PipelineError::Validation(_) => "validation",
            PipelineError::UnknownModelVersion(_) => "unknown_model_version",
            PipelineError::DependencyUnavailable { .. } => "dependency_unavailable",
            PipelineError::Publish { .. } => "publish",
        }
    }

    /// Whether the pipeline keeps running after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::DependencyUnavailable { .. })
    }
}

/// Event log failures.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event log not connected")]
    NotConnected,

    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

/// Output sink failures, split by whether a retry can help.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("transient sink error: {0}")]
    Transient(String),

    #[error("permanent sink error: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Transient(err.to_string())
    }
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
