//! Workspace config file source: config/config.toml and config/{env}.toml

use config::builder::DefaultState;
use config::{ConfigBuilder, File, FileFormat};
use std::path::Path;
use tracing::debug;

pub const ENV_NAME_VAR: &str = "MADSEA_ENV";
pub const DEFAULT_ENV_NAME: &str = "development";

/// Environment name selecting the `config/{env}.toml` overlay.
pub fn env_name() -> String {
    std::env::var(ENV_NAME_VAR).unwrap_or_else(|_| DEFAULT_ENV_NAME.to_string())
}

/// Add workspace config files to builder.
/// Precedence: config/config.toml (base) then config/{env_name}.toml.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
    env_name: &str,
) -> ConfigBuilder<DefaultState> {
    let config_dir = workspace_root.join("config");

    for path in [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ] {
        if path.is_file() {
            debug!(config_path = %path.display(), "Loading workspace configuration");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
    }

    builder
}
