//! Error types for the scene generation subsystem.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Cache store errors
///
/// These never escape `CacheStore::get`/`CacheStore::set`; they are logged and
/// the lookup degrades to a miss (or the write to a no-op).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to serialize cache entry: {0}")]
    Serialize(String),
}

/// Outcome classification for a single outbound backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Remote returned status {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl DispatchError {
    /// Whether a poll loop should keep going after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Timeout | DispatchError::Transport(_) => true,
            DispatchError::Remote { status, .. } => *status == 429 || *status >= 500,
            DispatchError::Decode(_) => false,
        }
    }
}

/// Scene-level generation failures
///
/// The coordinator converts every variant into a placeholder result; callers of
/// `GenerationCoordinator::generate` never observe these directly.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Reference image not found: {0:?}")]
    MissingReference(PathBuf),

    #[error("Missing credentials for backend '{0}'")]
    AuthMissing(String),

    #[error("Backend not registered: {0}")]
    UnknownBackend(String),

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Dispatch to '{backend}' failed: {source}")]
    Dispatch {
        backend: String,
        #[source]
        source: DispatchError,
    },

    #[error("Job {job_id} on '{backend}' failed: {reason}")]
    JobFailed {
        backend: String,
        job_id: String,
        reason: String,
    },

    #[error("Job {job_id} on '{backend}' timed out after {waited:?}")]
    JobTimeout {
        backend: String,
        job_id: String,
        waited: Duration,
    },

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to render placeholder: {0}")]
    Placeholder(String),
}

impl GenerationError {
    /// Stable label for the `error_class` log field.
    pub fn error_class(&self) -> &'static str {
        match self {
            GenerationError::MissingReference(_) => "missing_reference",
            GenerationError::AuthMissing(_) => "auth_missing",
            GenerationError::UnknownBackend(_) => "unknown_backend",
            GenerationError::InvalidRequest(_) => "invalid_request",
            GenerationError::Dispatch { source, .. } => match source {
                DispatchError::Remote { .. } => "dispatch_remote",
                DispatchError::Timeout => "dispatch_timeout",
                DispatchError::Transport(_) => "dispatch_transport",
                DispatchError::Decode(_) => "dispatch_decode",
            },
            GenerationError::JobFailed { .. } => "job_failed",
            GenerationError::JobTimeout { .. } => "job_timeout",
            GenerationError::Output(_) => "output_io",
            GenerationError::Placeholder(_) => "placeholder",
        }
    }

    pub(crate) fn dispatch(backend: &str, source: DispatchError) -> Self {
        GenerationError::Dispatch {
            backend: backend.to_string(),
            source,
        }
    }
}

/// Configuration and logging setup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
