//! Placeholder fallback when backends are unreachable or failing

use super::support::{cache_entry_count, closed_endpoint, sample_image, test_config, write_reference, FakeLocal};
use madsea::generation::{GenerationCoordinator, SceneOrigin};
use madsea::types::{Resolution, SceneRequest, StyleParams};
use tempfile::TempDir;

#[tokio::test]
async fn test_unreachable_backend_yields_decodable_placeholder() {
    let temp_dir = TempDir::new().unwrap();
    let endpoint = closed_endpoint().await;

    let mut config = test_config(temp_dir.path(), &endpoint);
    config.generation.resolution = Resolution::default();
    assert!(config.cache.cache_enabled);
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "plan_01.png", b"reference");
    let result = coordinator
        .generate(&SceneRequest::new(1, &reference, "a quiet street"))
        .await
        .unwrap();

    assert!(result.is_placeholder());
    assert!(result.path.ends_with("scene_001_plan_01.png"));

    let decoded = image::open(&result.path).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1024, 768));
    assert_eq!(cache_entry_count(temp_dir.path()), 0);
    assert_eq!(coordinator.stats().placeholders, 1);
}

#[tokio::test]
async fn test_every_scene_gets_a_path() {
    let temp_dir = TempDir::new().unwrap();
    let fake = FakeLocal::new(1, sample_image(32));
    let endpoint = fake.start().await;
    let dead = closed_endpoint().await;

    let mut config = test_config(temp_dir.path(), &endpoint);
    config
        .backends
        .insert("dead".into(), madsea::config::BackendConfig::local(dead));
    let coordinator = GenerationCoordinator::from_config(&config).unwrap();

    let reference = write_reference(temp_dir.path(), "plan_02.png", b"reference");
    let scenes: Vec<SceneRequest> = (0..7)
        .map(|i| {
            let scene = SceneRequest::new(i, &reference, format!("scene {}", i));
            if i % 3 == 0 {
                scene.with_style("default", StyleParams::new().with("backend", "dead"))
            } else {
                scene
            }
        })
        .collect();

    let results = coordinator.generate_all(&scenes).await;

    assert_eq!(results.len(), scenes.len());
    let placeholders = results
        .iter()
        .map(|r| r.as_ref().unwrap())
        .inspect(|r| assert!(r.path.is_file()))
        .filter(|r| matches!(r.origin, SceneOrigin::Placeholder { .. }))
        .count();
    assert_eq!(placeholders, 3);
    assert_eq!(fake.submits(), 4);

    let indices: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().scene_index).collect();
    assert_eq!(indices, (0..7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_failed_scene_is_retried_on_next_call() {
    let temp_dir = TempDir::new().unwrap();
    let reference = write_reference(temp_dir.path(), "plan_03.png", b"reference");
    let scene = SceneRequest::new(3, &reference, "a bridge");

    let dead = closed_endpoint().await;
    let coordinator = GenerationCoordinator::from_config(&test_config(temp_dir.path(), &dead)).unwrap();
    assert!(coordinator.generate(&scene).await.unwrap().is_placeholder());

    let fake = FakeLocal::new(1, sample_image(32));
    let endpoint = fake.start().await;
    let coordinator = GenerationCoordinator::from_config(&test_config(temp_dir.path(), &endpoint)).unwrap();
    let result = coordinator.generate(&scene).await.unwrap();

    assert_eq!(result.origin, SceneOrigin::Generated { backend: "local".into() });
    assert_eq!(std::fs::read(&result.path).unwrap(), sample_image(32));
}
