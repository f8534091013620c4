//! Merge rules: built-in defaults sit under every other source.

use crate::config::MadseaConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a builder whose lowest layer is `MadseaConfig::default()`.
///
/// Later sources override individual keys; maps such as `backends` are merged
/// key by key, so the default `local` backend stays available unless a later
/// layer redefines it.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&MadseaConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
