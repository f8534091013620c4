//! Fake backends served on ephemeral loopback ports, plus config helpers.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use madsea::config::{BackendConfig, MadseaConfig};
use madsea::types::Resolution;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// An endpoint with nothing listening behind it.
pub async fn closed_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn sample_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Local job service: jobs complete on the `ready_after`-th status call
/// (never, when zero).
pub struct FakeLocal {
    pub ready_after: u32,
    pub fail_jobs: bool,
    pub image: Vec<u8>,
    pub submits: AtomicU32,
    pub status_calls: AtomicU32,
    pub result_calls: AtomicU32,
    pub cancels: AtomicU32,
    pub last_submit: Mutex<Option<Value>>,
}

impl FakeLocal {
    pub fn new(ready_after: u32, image: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            ready_after,
            fail_jobs: false,
            image,
            submits: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            result_calls: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
            last_submit: Mutex::new(None),
        })
    }

    pub fn failing() -> Arc<Self> {
        let mut fake = Self::new(1, Vec::new());
        if let Some(inner) = Arc::get_mut(&mut fake) {
            inner.fail_jobs = true;
        }
        fake
    }

    pub async fn start(self: &Arc<Self>) -> String {
        let router = Router::new()
            .route("/submit", post(local_submit))
            .route("/status/{job_id}", get(local_status))
            .route("/result/{name}", get(local_result))
            .route("/cancel/{job_id}", post(local_cancel))
            .with_state(Arc::clone(self));
        serve(router).await
    }

    pub fn submits(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }
}

async fn local_submit(State(fake): State<Arc<FakeLocal>>, Json(body): Json<Value>) -> Json<Value> {
    let n = fake.submits.fetch_add(1, Ordering::SeqCst);
    *fake.last_submit.lock() = Some(body);
    Json(json!({ "job_id": format!("job-{}", n) }))
}

async fn local_status(State(fake): State<Arc<FakeLocal>>, Path(job_id): Path<String>) -> Json<Value> {
    let calls = fake.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if fake.fail_jobs {
        return Json(json!({ "status": "failed", "error": "sampler crashed" }));
    }
    if fake.ready_after > 0 && calls >= fake.ready_after {
        Json(json!({ "status": "completed", "result": format!("{}.png", job_id) }))
    } else {
        Json(json!({ "status": "running" }))
    }
}

async fn local_result(State(fake): State<Arc<FakeLocal>>, Path(_name): Path<String>) -> Response {
    fake.result_calls.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/png")], fake.image.clone()).into_response()
}

async fn local_cancel(State(fake): State<Arc<FakeLocal>>, Path(_job_id): Path<String>) -> StatusCode {
    fake.cancels.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CloudReply {
    Inline,
    Url,
}

/// Cloud image API requiring `Authorization: Bearer {api_key}`.
pub struct FakeCloud {
    pub api_key: String,
    pub reply: CloudReply,
    pub image: Vec<u8>,
    pub calls: AtomicU32,
    pub downloads: AtomicU32,
    pub base_url: Mutex<String>,
    pub last_request: Mutex<Option<Value>>,
}

impl FakeCloud {
    pub fn new(api_key: &str, reply: CloudReply, image: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            api_key: api_key.to_string(),
            reply,
            image,
            calls: AtomicU32::new(0),
            downloads: AtomicU32::new(0),
            base_url: Mutex::new(String::new()),
            last_request: Mutex::new(None),
        })
    }

    pub async fn start(self: &Arc<Self>) -> String {
        let router = Router::new()
            .route("/v1/images/generations", post(cloud_generate))
            .route("/files/{name}", get(cloud_download))
            .with_state(Arc::clone(self));
        let base = serve(router).await;
        *self.base_url.lock() = base.clone();
        format!("{}/v1", base)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn cloud_generate(
    State(fake): State<Arc<FakeCloud>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    fake.calls.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {}", fake.api_key);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    *fake.last_request.lock() = Some(body);

    let data = match fake.reply {
        CloudReply::Inline => json!({ "b64_json": BASE64.encode(&fake.image) }),
        CloudReply::Url => json!({ "url": format!("{}/files/out.png", fake.base_url.lock()) }),
    };
    Json(json!({ "id": "gen-1", "data": [data] })).into_response()
}

async fn cloud_download(
    State(fake): State<Arc<FakeCloud>>,
    headers: HeaderMap,
    Path(_name): Path<String>,
) -> Response {
    // Pre-signed URLs must not receive the API key
    if headers.contains_key(header::AUTHORIZATION) {
        return (StatusCode::BAD_REQUEST, "unexpected credentials").into_response();
    }
    fake.downloads.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/png")], fake.image.clone()).into_response()
}

/// Config rooted in `dir` with a small resolution and fast polling.
pub fn test_config(dir: &FsPath, local_endpoint: &str) -> MadseaConfig {
    let mut config = MadseaConfig::default();
    config.generation.output_dir = dir.join("out");
    config.generation.resolution = Resolution::new(64, 48);
    config.generation.poll_interval_seconds = 0.1;
    config.generation.poll_timeout_seconds = 5.0;
    config.generation.request_timeout_seconds = 5.0;
    config.cache.cache_dir = dir.join("cache");
    config
        .backends
        .insert("local".into(), BackendConfig::local(local_endpoint));
    config
}

pub fn write_reference(dir: &FsPath, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join("boards").join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn cache_entry_count(dir: &FsPath) -> usize {
    std::fs::read_dir(dir.join("cache"))
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}
