//! Core data types shared across the cache, dispatch and backend layers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Opaque style configuration supplied by the style catalogue.
///
/// Backed by an ordered map so that iteration (and therefore hashing) does not
/// depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleParams(BTreeMap<String, Value>);

impl StyleParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for StyleParams {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Output image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One storyboard scene to be rendered. Read-only to the generation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRequest {
    pub reference_image_path: PathBuf,
    pub text: String,
    /// Empty selects the coordinator's default style.
    #[serde(default)]
    pub style_name: String,
    #[serde(default)]
    pub style_params: StyleParams,
    pub scene_index: usize,
    /// Overrides the coordinator's default output location for this scene.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

impl SceneRequest {
    pub fn new(
        scene_index: usize,
        reference_image_path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            reference_image_path: reference_image_path.into(),
            text: text.into(),
            style_name: String::new(),
            style_params: StyleParams::default(),
            scene_index,
            output_path: None,
        }
    }

    pub fn with_style(mut self, style_name: impl Into<String>, style_params: StyleParams) -> Self {
        self.style_name = style_name.into();
        self.style_params = style_params;
        self
    }

    pub fn with_output_path(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    /// File stem of the reference image, used to name outputs.
    pub fn reference_stem(&self) -> String {
        self.reference_image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_string())
    }

    /// Designated output path for this scene under `output_dir`.
    pub fn output_path_in(&self, output_dir: &Path) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => output_dir.join(format!(
                "scene_{:03}_{}.png",
                self.scene_index,
                self.reference_stem()
            )),
        }
    }
}

/// Backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Cloud,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sliding-window quota: at most `limit` calls per `period`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub period: Duration,
}

impl RateLimit {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }
}

/// Immutable description of a configured backend
#[derive(Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    /// Base URL without trailing slash
    pub endpoint: String,
    pub credentials: Option<String>,
    pub rate_limit: Option<RateLimit>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, kind: BackendKind, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credentials: None,
            rate_limit: None,
        }
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Join a request path onto the endpoint. Absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }
}

// Credentials stay out of logs.
impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}
