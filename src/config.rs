//! Configuration System
//!
//! Layered configuration for the generation core: built-in defaults, then the
//! global user file, then workspace files, then `MADSEA__*` environment
//! variables. The core consumes the resulting `MadseaConfig`; it never writes
//! configuration on its own.

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::types::{BackendDescriptor, BackendKind, RateLimit, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:8188";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MadseaConfig {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Backends by name
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    /// Secrets by backend name
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generation and polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub resolution: Resolution,

    #[serde(default = "default_backend_name")]
    pub default_backend: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,

    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: f64,

    /// Per-call HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,

    #[serde(default = "default_max_concurrent_scenes")]
    pub max_concurrent_scenes: usize,

    #[serde(default = "default_style")]
    pub default_style: String,
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

/// One configured backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,

    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Cloud operation path, relative to `endpoint`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Cloud model name sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub period_seconds: u64,
}

impl From<RateLimitConfig> for RateLimit {
    fn from(config: RateLimitConfig) -> Self {
        RateLimit::new(config.limit, Duration::from_secs(config.period_seconds))
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_backend_name() -> String {
    "local".to_string()
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_poll_timeout() -> f64 {
    300.0
}

fn default_request_timeout() -> f64 {
    30.0
}

fn default_max_concurrent_scenes() -> usize {
    4
}

fn default_style() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            resolution: Resolution::default(),
            default_backend: default_backend_name(),
            poll_interval_seconds: default_poll_interval(),
            poll_timeout_seconds: default_poll_timeout(),
            request_timeout_seconds: default_request_timeout(),
            max_concurrent_scenes: default_max_concurrent_scenes(),
            default_style: default_style(),
        }
    }
}

impl GenerationConfig {
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds, default_poll_interval())
    }

    pub fn poll_timeout(&self) -> Duration {
        seconds(self.poll_timeout_seconds, default_poll_timeout())
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds, default_request_timeout())
    }
}

// Negative, NaN or overflowing values fall back to the default.
fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_enabled: default_true(),
            cache_ttl_seconds: default_cache_ttl(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl BackendConfig {
    pub fn local(endpoint: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Local,
            endpoint: endpoint.into(),
            rate_limit: None,
            operation: None,
            model: None,
        }
    }

    pub fn cloud(endpoint: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Cloud,
            ..Self::local(endpoint)
        }
    }
}

impl Default for MadseaConfig {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert(
            default_backend_name(),
            BackendConfig::local(DEFAULT_LOCAL_ENDPOINT),
        );
        Self {
            generation: GenerationConfig::default(),
            cache: CacheConfig::default(),
            backends,
            api_keys: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MadseaConfig {
    /// Check the whole configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (name, backend) in &self.backends {
            if backend.endpoint.trim().is_empty() {
                errors.push(format!("Backend '{}': endpoint cannot be empty", name));
            }
            if let Some(rate_limit) = backend.rate_limit {
                if rate_limit.limit == 0 {
                    errors.push(format!("Backend '{}': rate_limit.limit must be positive", name));
                }
                if rate_limit.period_seconds == 0 {
                    errors.push(format!(
                        "Backend '{}': rate_limit.period_seconds must be positive",
                        name
                    ));
                }
            }
        }

        if !self.backends.contains_key(&self.generation.default_backend) {
            errors.push(format!(
                "Generation: default_backend '{}' is not configured",
                self.generation.default_backend
            ));
        }

        let generation = &self.generation;
        let interval_ok = generation.poll_interval_seconds.is_finite()
            && generation.poll_interval_seconds > 0.0;
        let timeout_ok =
            generation.poll_timeout_seconds.is_finite() && generation.poll_timeout_seconds > 0.0;
        if !interval_ok {
            errors.push("Generation: poll_interval_seconds must be positive".to_string());
        }
        if !timeout_ok {
            errors.push("Generation: poll_timeout_seconds must be positive".to_string());
        }
        if interval_ok && timeout_ok && generation.poll_timeout_seconds < generation.poll_interval_seconds {
            errors.push(
                "Generation: poll_timeout_seconds must not be shorter than poll_interval_seconds"
                    .to_string(),
            );
        }
        if !(generation.request_timeout_seconds.is_finite() && generation.request_timeout_seconds > 0.0) {
            errors.push("Generation: request_timeout_seconds must be positive".to_string());
        }
        if generation.max_concurrent_scenes == 0 {
            errors.push("Generation: max_concurrent_scenes must be at least 1".to_string());
        }
        if generation.resolution.width == 0 || generation.resolution.height == 0 {
            errors.push(format!(
                "Generation: resolution {} has a zero dimension",
                generation.resolution
            ));
        }
        if self.cache.cache_enabled && self.cache.cache_dir.as_os_str().is_empty() {
            errors.push("Cache: cache_dir cannot be empty when the cache is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Immutable descriptors for every configured backend, with credentials
    /// taken from `api_keys`.
    pub fn backend_descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends
            .iter()
            .map(|(name, backend)| self.descriptor_for(name, backend))
            .collect()
    }

    pub(crate) fn descriptor_for(&self, name: &str, backend: &BackendConfig) -> BackendDescriptor {
        let mut descriptor = BackendDescriptor::new(name, backend.kind, backend.endpoint.as_str());
        if let Some(key) = self.api_keys.get(name).filter(|key| !key.is_empty()) {
            descriptor = descriptor.with_credentials(key.as_str());
        }
        if let Some(rate_limit) = backend.rate_limit {
            descriptor = descriptor.with_rate_limit(rate_limit.into());
        }
        descriptor
    }
}
