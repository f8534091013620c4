//! Logging setup
//!
//! Structured logging through `tracing`. Level, format and destination come from
//! `LoggingConfig`, and each can be overridden from the environment:
//!
//! - `MADSEA_LOG`: full filter directive (replaces level and module levels)
//! - `MADSEA_LOG_FORMAT`: `text` or `json`
//! - `MADSEA_LOG_OUTPUT`: `stdout`, `stderr` or `file`
//! - `MADSEA_LOG_MODULES`: extra `module=level` directives, comma separated

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const ENV_FILTER: &str = "MADSEA_LOG";
const ENV_FORMAT: &str = "MADSEA_LOG_FORMAT";
const ENV_OUTPUT: &str = "MADSEA_LOG_OUTPUT";
const ENV_MODULES: &str = "MADSEA_LOG_MODULES";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Used when `output = "file"`
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// ANSI colors for text output on a terminal stream
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module level overrides, e.g. `madsea::dispatch = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Logging(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

impl std::str::FromStr for LogOutput {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(ConfigError::Logging(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/madsea.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file: default_log_file(),
            color: default_true(),
            modules: BTreeMap::new(),
        }
    }
}

/// Install the global subscriber.
///
/// Environment variables take precedence over `config`, which takes precedence
/// over defaults. Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ConfigError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = match std::env::var(ENV_FORMAT) {
        Ok(value) => value.parse()?,
        Err(_) => config.format,
    };
    let output = match std::env::var(ENV_OUTPUT) {
        Ok(value) => value.parse()?,
        Err(_) => config.output,
    };

    let (writer, ansi) = match output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), config.color),
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), config.color),
        LogOutput::File => (BoxMakeWriter::new(open_log_file(config)?), false),
    };

    let registry = Registry::default().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
    Ok(())
}

fn open_log_file(config: &LoggingConfig) -> Result<Arc<std::fs::File>, ConfigError> {
    if let Some(parent) = config.file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::Logging(format!("Failed to create log directory: {}", e))
            })?;
        }
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .map(Arc::new)
        .map_err(|e| {
            ConfigError::Logging(format!("Failed to open log file {:?}: {}", config.file, e))
        })
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_FILTER) {
        return Ok(filter);
    }

    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(&config.level);
    for (module, level) in &config.modules {
        filter = filter.add_directive(parse_directive(module, level)?);
    }

    if let Ok(modules) = std::env::var(ENV_MODULES) {
        for (module, level) in parse_module_list(&modules) {
            filter = filter.add_directive(parse_directive(module, level)?);
        }
    }

    Ok(filter)
}

fn parse_directive(
    module: &str,
    level: &str,
) -> Result<tracing_subscriber::filter::Directive, ConfigError> {
    format!("{}={}", module, level)
        .parse()
        .map_err(|e| ConfigError::Logging(format!("Invalid log directive {}={}: {}", module, level, e)))
}

/// Split `"a=debug, b=warn"` into pairs, skipping malformed items.
fn parse_module_list(list: &str) -> Vec<(&str, &str)> {
    list.split(',')
        .filter_map(|item| {
            let (module, level) = item.split_once('=')?;
            let (module, level) = (module.trim(), level.trim());
            (!module.is_empty() && !level.is_empty()).then_some((module, level))
        })
        .collect()
}
