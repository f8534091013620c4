//! End-to-end generation against a fake cloud image API

use super::support::{sample_image, test_config, write_reference, CloudReply, FakeCloud, FakeLocal};
use madsea::config::{BackendConfig, RateLimitConfig};
use madsea::generation::{GenerationCoordinator, SceneOrigin};
use madsea::types::{SceneRequest, StyleParams};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tempfile::TempDir;

async fn cloud_config(
    temp_dir: &TempDir,
    fake: &std::sync::Arc<FakeCloud>,
    api_key: Option<&str>,
) -> madsea::MadseaConfig {
    let local = FakeLocal::new(1, sample_image(8));
    let local_endpoint = local.start().await;
    let cloud_endpoint = fake.start().await;

    let mut config = test_config(temp_dir.path(), &local_endpoint);
    config.generation.default_backend = "cloud".into();
    config.backends.insert(
        "cloud".into(),
        BackendConfig {
            model: Some("img-model-1".into()),
            ..BackendConfig::cloud(cloud_endpoint)
        },
    );
    if let Some(key) = api_key {
        config.api_keys.insert("cloud".into(), key.into());
    }
    config
}

#[tokio::test]
async fn test_inline_result_with_bearer_auth() {
    let temp_dir = TempDir::new().unwrap();
    let image = sample_image(96);
    let fake = FakeCloud::new("sk-test", CloudReply::Inline, image.clone());
    let config = cloud_config(&temp_dir, &fake, Some("sk-test")).await;
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "shot_01.png", b"reference");
    let result = coordinator
        .generate(&SceneRequest::new(1, &reference, "a paper boat"))
        .await
        .unwrap();

    assert_eq!(result.origin, SceneOrigin::Generated { backend: "cloud".into() });
    assert_eq!(std::fs::read(&result.path).unwrap(), image);

    let request = fake.last_request.lock().clone().unwrap();
    assert_eq!(request["prompt"], "a paper boat");
    assert_eq!(request["size"], "64x48");
    assert_eq!(request["model"], "img-model-1");
}

#[tokio::test]
async fn test_url_result_downloaded_without_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let image = sample_image(200);
    let fake = FakeCloud::new("sk-test", CloudReply::Url, image.clone());
    let config = cloud_config(&temp_dir, &fake, Some("sk-test")).await;
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "shot_02.png", b"reference");
    let result = coordinator
        .generate(&SceneRequest::new(2, &reference, "a kite"))
        .await
        .unwrap();

    assert!(!result.is_placeholder(), "{:?}", result.origin);
    assert_eq!(std::fs::read(&result.path).unwrap(), image);
    assert_eq!(fake.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wrong_key_yields_placeholder() {
    let temp_dir = TempDir::new().unwrap();
    let fake = FakeCloud::new("sk-test", CloudReply::Inline, sample_image(16));
    let config = cloud_config(&temp_dir, &fake, Some("sk-wrong")).await;
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "shot_03.png", b"reference");
    let result = coordinator
        .generate(&SceneRequest::new(3, &reference, "a moth"))
        .await
        .unwrap();

    match &result.origin {
        SceneOrigin::Placeholder { reason } => assert!(reason.contains("401"), "{}", reason),
        other => panic!("expected placeholder, got {:?}", other),
    }
    assert_eq!(fake.calls(), 1);
}

#[tokio::test]
async fn test_missing_key_fails_only_the_cloud_backend() {
    let temp_dir = TempDir::new().unwrap();
    let fake = FakeCloud::new("sk-test", CloudReply::Inline, sample_image(16));
    let config = cloud_config(&temp_dir, &fake, None).await;
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "shot_04.png", b"reference");
    let cloud_scene = SceneRequest::new(4, &reference, "a moth");
    let local_scene = SceneRequest::new(5, &reference, "a moth")
        .with_style("default", StyleParams::new().with("backend", "local"));

    let results = coordinator.generate_all(&[cloud_scene, local_scene]).await;

    assert!(results[0].as_ref().unwrap().is_placeholder());
    assert_eq!(
        results[1].as_ref().unwrap().origin,
        SceneOrigin::Generated { backend: "local".into() }
    );
    // No request leaves without credentials
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn test_rate_limit_spaces_calls() {
    let temp_dir = TempDir::new().unwrap();
    let fake = FakeCloud::new("sk-test", CloudReply::Inline, sample_image(16));
    let mut config = cloud_config(&temp_dir, &fake, Some("sk-test")).await;
    if let Some(cloud) = config.backends.get_mut("cloud") {
        cloud.rate_limit = Some(RateLimitConfig {
            limit: 1,
            period_seconds: 1,
        });
    }
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "shot_06.png", b"reference");
    let scenes: Vec<_> = (0..2)
        .map(|i| SceneRequest::new(i, &reference, format!("scene {}", i)))
        .collect();

    let started = Instant::now();
    let results = coordinator.generate_all(&scenes).await;

    assert!(results.iter().all(|r| !r.as_ref().unwrap().is_placeholder()));
    assert_eq!(fake.calls(), 2);
    assert!(started.elapsed() >= Duration::from_millis(900), "{:?}", started.elapsed());
}
