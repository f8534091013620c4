//! Global config file source: $XDG_CONFIG_HOME/madsea/config.toml
//! (or the platform equivalent resolved by `directories`).

use config::builder::DefaultState;
use config::{ConfigBuilder, File, FileFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path to the global config file, if a home directory can be resolved.
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "madsea").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add `path` to the builder when it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: Option<&Path>,
) -> ConfigBuilder<DefaultState> {
    match path {
        Some(path) if path.is_file() => {
            debug!(config_path = %path.display(), "Loading global configuration");
            builder.add_source(File::from(path).format(FileFormat::Toml).required(false))
        }
        Some(path) => {
            debug!(config_path = %path.display(), "No global configuration file");
            builder
        }
        None => builder,
    }
}
