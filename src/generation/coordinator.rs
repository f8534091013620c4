//! Generation coordinator: cache lookup, backend lifecycle, output persistence
//! and placeholder fallback for one scene at a time.

use crate::backend::{
    cloud::DEFAULT_OPERATION, BackendAdapter, CloudApiAdapter, LocalComputeAdapter, PollOutcome,
    PollPolicy,
};
use crate::cache::{compute_content_hash, generate_key, CacheKey, CacheStore};
use crate::config::{GenerationConfig, MadseaConfig};
use crate::dispatch::{Dispatcher, RateLimiter};
use crate::error::{ConfigError, GenerationError};
use crate::generation::locks::KeyLocks;
use crate::generation::placeholder::render_placeholder;
use crate::types::{BackendKind, Resolution, SceneRequest};
use futures::stream::{self, StreamExt};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Style parameter selecting a backend other than the default
const BACKEND_OVERRIDE_KEY: &str = "backend";

/// Coordinator settings derived from `GenerationConfig`
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub output_dir: PathBuf,
    pub resolution: Resolution,
    pub default_backend: String,
    /// Style name given to scenes that carry none
    pub default_style: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_concurrent_scenes: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            resolution: config.resolution,
            default_backend: config.default_backend.clone(),
            default_style: config.default_style.clone(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            max_concurrent_scenes: config.max_concurrent_scenes.max(1),
        }
    }
}

/// How a scene's image was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneOrigin {
    Cached,
    Generated { backend: String },
    Placeholder { reason: String },
}

/// Result of `GenerationCoordinator::generate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScene {
    pub scene_index: usize,
    pub path: PathBuf,
    pub origin: SceneOrigin,
}

impl GeneratedScene {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.origin, SceneOrigin::Placeholder { .. })
    }
}

/// Counters since the coordinator was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub cache_hits: usize,
    pub generated: usize,
    pub placeholders: usize,
}

#[derive(Default)]
struct StatCounters {
    cache_hits: AtomicUsize,
    generated: AtomicUsize,
    placeholders: AtomicUsize,
}

/// Identifiers known so far for the scene being generated; used in failure logs.
#[derive(Default)]
struct Attempt {
    backend: Option<String>,
    job_id: Option<String>,
}

/// Entry point of the generation core
pub struct GenerationCoordinator {
    settings: GenerationSettings,
    cache: Arc<CacheStore>,
    dispatcher: Arc<Dispatcher>,
    backends: HashMap<String, Arc<dyn BackendAdapter>>,
    locks: KeyLocks,
    stats: StatCounters,
    cancel: CancellationToken,
}

impl GenerationCoordinator {
    pub fn new(
        settings: GenerationSettings,
        cache: Arc<CacheStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            settings,
            cache,
            dispatcher,
            backends: HashMap::new(),
            locks: KeyLocks::new(),
            stats: StatCounters::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build a coordinator with every backend described by `config`.
    pub fn from_config(config: &MadseaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let request_timeout = config.generation.request_timeout();

        let descriptors: Vec<_> = config
            .backends
            .iter()
            .map(|(name, backend)| (config.descriptor_for(name, backend), backend))
            .collect();

        let rate_limiter = Arc::new(RateLimiter::from_descriptors(
            descriptors.iter().map(|(descriptor, _)| descriptor),
        ));
        let dispatcher = Dispatcher::new(rate_limiter)
            .map_err(|e| ConfigError::Load(format!("Failed to create dispatcher: {}", e)))?;
        let cache = CacheStore::new(
            &config.cache.cache_dir,
            config.cache.ttl(),
            config.cache.cache_enabled,
        );

        let mut coordinator = Self::new(
            GenerationSettings::from(&config.generation),
            Arc::new(cache),
            Arc::new(dispatcher),
        );

        for (descriptor, backend) in descriptors {
            let adapter: Arc<dyn BackendAdapter> = match descriptor.kind {
                BackendKind::Local => Arc::new(
                    LocalComputeAdapter::new(descriptor).with_request_timeout(request_timeout),
                ),
                BackendKind::Cloud => Arc::new(
                    CloudApiAdapter::new(descriptor)
                        .with_operation(
                            backend
                                .operation
                                .clone()
                                .unwrap_or_else(|| DEFAULT_OPERATION.to_string()),
                        )
                        .with_model(backend.model.clone())
                        .with_request_timeout(request_timeout),
                ),
            };
            coordinator.register_backend(adapter);
        }

        Ok(coordinator)
    }

    pub fn with_backend(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.register_backend(adapter);
        self
    }

    /// Register an adapter under its descriptor name, replacing any previous one.
    pub fn register_backend(&mut self, adapter: Arc<dyn BackendAdapter>) {
        let name = adapter.name().to_string();
        debug!(backend = %name, mode = %adapter.mode(), "Registered backend");
        self.backends.insert(name, adapter);
    }

    /// Share a cancellation token with the caller; cancelling it stops every
    /// in-flight poll loop.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn stats(&self) -> GenerationStats {
        GenerationStats {
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            generated: self.stats.generated.load(Ordering::Relaxed),
            placeholders: self.stats.placeholders.load(Ordering::Relaxed),
        }
    }

    /// Produce the image for one scene.
    ///
    /// Never fails: any error along the way is logged and replaced by a
    /// placeholder at the scene's output path. Returns `None` only when even
    /// the placeholder cannot be written.
    pub async fn generate(&self, scene: &SceneRequest) -> Option<GeneratedScene> {
        let output_path = scene.output_path_in(&self.settings.output_dir);
        let mut attempt = Attempt::default();

        match self.try_generate(scene, &output_path, &mut attempt).await {
            Ok(origin) => {
                match &origin {
                    SceneOrigin::Cached => self.stats.cache_hits.fetch_add(1, Ordering::Relaxed),
                    _ => self.stats.generated.fetch_add(1, Ordering::Relaxed),
                };
                Some(GeneratedScene {
                    scene_index: scene.scene_index,
                    path: output_path,
                    origin,
                })
            }
            Err(e) => {
                error!(
                    scene_index = scene.scene_index,
                    backend = attempt.backend.as_deref().unwrap_or("none"),
                    job_id = attempt.job_id.as_deref().unwrap_or("none"),
                    error_class = e.error_class(),
                    error = %e,
                    "Scene generation failed, substituting placeholder"
                );
                self.write_placeholder(scene, output_path, e.to_string()).await
            }
        }
    }

    /// Generate every scene, at most `max_concurrent_scenes` at a time.
    /// Results are returned in input order.
    pub async fn generate_all(&self, scenes: &[SceneRequest]) -> Vec<Option<GeneratedScene>> {
        info!(scenes = scenes.len(), concurrency = self.settings.max_concurrent_scenes, "Generating scenes");
        let results: Vec<_> = stream::iter(scenes.iter().map(|scene| self.generate(scene)))
            .buffered(self.settings.max_concurrent_scenes.max(1))
            .collect()
            .await;

        let stats = self.stats();
        info!(
            cache_hits = stats.cache_hits,
            generated = stats.generated,
            placeholders = stats.placeholders,
            "Scene batch finished"
        );
        results
    }

    async fn try_generate(
        &self,
        scene: &SceneRequest,
        output_path: &Path,
        attempt: &mut Attempt,
    ) -> Result<SceneOrigin, GenerationError> {
        let styled = self.with_default_style(scene);
        let scene: &SceneRequest = &styled;
        let adapter = self.select_backend(scene)?;
        attempt.backend = Some(adapter.name().to_string());

        let reference = read_reference(&scene.reference_image_path).await?;
        let key = generate_key(
            &compute_content_hash(&reference),
            &scene.text,
            &scene.style_name,
            &scene.style_params,
            self.settings.resolution,
            &adapter.mode(),
        );

        if self.serve_cached(&key, output_path).await {
            return Ok(SceneOrigin::Cached);
        }

        // Concurrent misses on one key wait here; the loser re-checks the cache.
        let _guard = if self.cache.is_enabled() {
            let guard = self.locks.lock(key).await;
            if self.serve_cached(&key, output_path).await {
                return Ok(SceneOrigin::Cached);
            }
            Some(guard)
        } else {
            None
        };

        let bytes = self.run_backend(adapter.as_ref(), scene, &reference, attempt).await?;
        write_atomic(output_path, &bytes).await?;
        // The cache keeps its own copy; the output path may be rewritten later.
        self.cache.store_result(&key, &bytes);

        info!(
            scene_index = scene.scene_index,
            backend = %adapter.name(),
            path = %output_path.display(),
            bytes = bytes.len(),
            "Scene generated"
        );
        Ok(SceneOrigin::Generated {
            backend: adapter.name().to_string(),
        })
    }

    fn with_default_style<'a>(&self, scene: &'a SceneRequest) -> Cow<'a, SceneRequest> {
        if !scene.style_name.trim().is_empty() {
            return Cow::Borrowed(scene);
        }
        let mut styled = scene.clone();
        styled.style_name = self.settings.default_style.clone();
        Cow::Owned(styled)
    }

    fn select_backend(&self, scene: &SceneRequest) -> Result<Arc<dyn BackendAdapter>, GenerationError> {
        let name = scene
            .style_params
            .get_str(BACKEND_OVERRIDE_KEY)
            .unwrap_or(self.settings.default_backend.as_str());
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| GenerationError::UnknownBackend(name.to_string()))
    }

    /// Place a cached result at `output_path`. Returns `false` on a miss or when
    /// the cached file cannot be copied.
    async fn serve_cached(&self, key: &CacheKey, output_path: &Path) -> bool {
        let Some(cached) = self.cache.get(key) else {
            return false;
        };

        if cached != output_path {
            if let Err(e) = copy_atomic(&cached, output_path).await {
                warn!(
                    key = %key,
                    cached = %cached.display(),
                    path = %output_path.display(),
                    error = %e,
                    "Failed to copy cached result, regenerating"
                );
                return false;
            }
        }
        debug!(key = %key, path = %output_path.display(), "Served scene from cache");
        true
    }

    async fn run_backend(
        &self,
        adapter: &dyn BackendAdapter,
        scene: &SceneRequest,
        reference: &[u8],
        attempt: &mut Attempt,
    ) -> Result<bytes::Bytes, GenerationError> {
        let payload = adapter.prepare(scene, reference, self.settings.resolution)?;
        let mut job = adapter.submit(&self.dispatcher, payload).await?;
        attempt.job_id = Some(job.job_id.clone());

        let policy = PollPolicy::new(self.settings.poll_interval, self.settings.poll_timeout)
            .with_cancellation(self.cancel.child_token());

        let result = match adapter.poll(&self.dispatcher, &mut job, &policy).await {
            PollOutcome::Completed(result) => result,
            PollOutcome::Failed(reason) => {
                return Err(GenerationError::JobFailed {
                    backend: job.backend_name,
                    job_id: job.job_id,
                    reason,
                })
            }
            PollOutcome::TimedOut { waited } => {
                return Err(GenerationError::JobTimeout {
                    backend: job.backend_name,
                    job_id: job.job_id,
                    waited,
                })
            }
        };

        let bytes = adapter.fetch(&self.dispatcher, &result).await?;
        if bytes.is_empty() {
            return Err(GenerationError::JobFailed {
                backend: job.backend_name,
                job_id: job.job_id,
                reason: "backend returned an empty result".to_string(),
            });
        }
        Ok(bytes)
    }

    async fn write_placeholder(
        &self,
        scene: &SceneRequest,
        output_path: PathBuf,
        reason: String,
    ) -> Option<GeneratedScene> {
        let written = match render_placeholder(self.settings.resolution) {
            Ok(png) => write_atomic(&output_path, &png).await.map_err(GenerationError::from),
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.stats.placeholders.fetch_add(1, Ordering::Relaxed);
                Some(GeneratedScene {
                    scene_index: scene.scene_index,
                    path: output_path,
                    origin: SceneOrigin::Placeholder { reason },
                })
            }
            Err(e) => {
                error!(
                    scene_index = scene.scene_index,
                    path = %output_path.display(),
                    error_class = e.error_class(),
                    error = %e,
                    "Failed to write placeholder"
                );
                None
            }
        }
    }
}

async fn read_reference(path: &Path) -> Result<Vec<u8>, GenerationError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(GenerationError::MissingReference(path.to_path_buf()))
        }
        Err(_) if path.is_dir() => Err(GenerationError::MissingReference(path.to_path_buf())),
        Err(e) => Err(GenerationError::Output(e)),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "scene".into());
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

async fn rename_into_place(tmp: &Path, path: &Path) -> io::Result<()> {
    if let Err(e) = tokio::fs::rename(tmp, path).await {
        let _ = tokio::fs::remove_file(tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Write via a temp sibling and rename, so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    ensure_parent(path).await?;
    let tmp = tmp_sibling(path);
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    rename_into_place(&tmp, path).await
}

async fn copy_atomic(from: &Path, to: &Path) -> io::Result<()> {
    ensure_parent(to).await?;
    let tmp = tmp_sibling(to);
    if let Err(e) = tokio::fs::copy(from, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    rename_into_place(&tmp, to).await
}
