//! Integration tests for the configuration system

use madsea::config::{ConfigLoader, MadseaConfig};
use madsea::error::ConfigError;
use madsea::generation::GenerationCoordinator;
use madsea::logging::{init_logging, LogOutput, LoggingConfig};
use madsea::types::{BackendKind, RateLimit};
use std::time::Duration;
use tempfile::TempDir;

fn write_workspace_config(root: &std::path::Path, name: &str, contents: &str) {
    let dir = root.join("config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn test_workspace_config_builds_coordinator() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        "config.toml",
        r#"
[generation]
default_backend = "cloud"
max_concurrent_scenes = 2

[backends.cloud]
kind = "cloud"
endpoint = "https://images.example.com/v1"
operation = "generate"
rate_limit = { limit = 30, period_seconds = 60 }

[api_keys]
cloud = "sk-workspace"
"#,
    );

    let config = ConfigLoader::load_layered(temp_dir.path(), None, "test").unwrap();
    assert!(config.validate().is_ok());

    let descriptors = config.backend_descriptors();
    let cloud = descriptors.iter().find(|d| d.name == "cloud").unwrap();
    assert_eq!(cloud.kind, BackendKind::Cloud);
    assert_eq!(cloud.credentials.as_deref(), Some("sk-workspace"));
    assert_eq!(cloud.rate_limit, Some(RateLimit::new(30, Duration::from_secs(60))));
    assert_eq!(cloud.url_for(config.backends["cloud"].operation.as_deref().unwrap()), "https://images.example.com/v1/generate");

    let coordinator = GenerationCoordinator::from_config(&config).unwrap();
    assert_eq!(coordinator.backend_names(), vec!["cloud", "local"]);
    assert_eq!(coordinator.settings().max_concurrent_scenes, 2);
    assert_eq!(coordinator.settings().default_backend, "cloud");
}

#[test]
fn test_invalid_workspace_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        "config.toml",
        r#"
[generation]
poll_interval_seconds = 30
poll_timeout_seconds = 10

[backends.cloud]
kind = "cloud"
endpoint = ""
rate_limit = { limit = 0, period_seconds = 60 }
"#,
    );

    let config = ConfigLoader::load_layered(temp_dir.path(), None, "test").unwrap();
    match GenerationCoordinator::from_config(&config) {
        Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 3, "{:?}", errors),
        Err(other) => panic!("expected Invalid, got {}", other),
        Ok(_) => panic!("expected validation failure"),
    }
}

#[test]
fn test_unknown_backend_kind_fails_to_load() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace_config(
        temp_dir.path(),
        "config.toml",
        r#"
[backends.gpu]
kind = "quantum"
endpoint = "http://127.0.0.1:9000"
"#,
    );

    let result = ConfigLoader::load_layered(temp_dir.path(), None, "test");
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn test_saved_config_reloads_identically() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("saved").join("madsea.toml");

    let mut config = MadseaConfig::default();
    config.generation.poll_interval_seconds = 0.5;
    config.cache.cache_ttl_seconds = 3600;
    config.logging.level = "debug".into();

    ConfigLoader::save_to_file(&config, &path).unwrap();
    assert_eq!(ConfigLoader::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_logging_to_file_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let log_file = temp_dir.path().join("logs").join("madsea.log");
    let config = LoggingConfig {
        output: LogOutput::File,
        file: log_file.clone(),
        ..LoggingConfig::default()
    };

    init_logging(Some(&config)).unwrap();
    // Second initialisation keeps the first subscriber
    init_logging(Some(&config)).unwrap();
    assert!(log_file.exists());
}
