//! ConfigLoader: assembles the layered sources into a `MadseaConfig`.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::MadseaConfig;
use crate::error::ConfigError;
use config::{Config, File, FileFormat};
use std::path::Path;
use tracing::info;

/// Loads, layers and persists configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for `workspace_root`.
    ///
    /// Lowest to highest precedence: defaults, global file, `config/config.toml`,
    /// `config/{MADSEA_ENV}.toml`, `MADSEA__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<MadseaConfig, ConfigError> {
        let global = global_file::global_config_path();
        Self::load_layered(
            workspace_root,
            global.as_deref(),
            &workspace_file::env_name(),
        )
    }

    /// `load` with an explicit global file and environment name.
    pub fn load_layered(
        workspace_root: &Path,
        global_config: Option<&Path>,
        env_name: &str,
    ) -> Result<MadseaConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder, global_config);
        let builder = workspace_file::add_to_builder(builder, workspace_root, env_name);
        let builder = environment::add_to_builder(builder);

        let config: MadseaConfig = builder.build()?.try_deserialize()?;
        info!(
            workspace = %workspace_root.display(),
            env = env_name,
            backends = config.backends.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load a single TOML file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<MadseaConfig, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Write `config` as TOML, creating parent directories as needed.
    pub fn save_to_file(config: &MadseaConfig, path: &Path) -> Result<(), ConfigError> {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::Load(format!("Failed to serialize configuration: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::Load(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        std::fs::write(path, rendered)
            .map_err(|e| ConfigError::Load(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Defaults only, without touching the filesystem or environment.
    pub fn defaults() -> Result<MadseaConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(Config::try_from(&MadseaConfig::default())?)
            .build()?
            .try_deserialize()?)
    }
}
