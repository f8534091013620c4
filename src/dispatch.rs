//! Outbound call dispatch
//!
//! Issues HTTP calls to a named backend behind the per-backend rate limiter and
//! classifies every outcome into a decoded payload or a `DispatchError`. Holds no
//! generation-specific state.

pub mod rate_limit;

pub use rate_limit::RateLimiter;

use crate::error::DispatchError;
use crate::types::BackendDescriptor;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub use reqwest::Method;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_EXCERPT_CHARS: usize = 500;

/// One outbound call
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub path: String,
    pub payload: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    /// Attach the backend's bearer credentials
    pub authenticate: bool,
}

impl DispatchRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: None,
            headers: Vec::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
            authenticate: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post_json(path: impl Into<String>, payload: Value) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.payload = Some(payload);
        request
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip the bearer header, e.g. for pre-signed result URLs.
    pub fn without_auth(mut self) -> Self {
        self.authenticate = false;
        self
    }
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResponse {
    Json(Value),
    Bytes(Bytes),
}

impl DispatchResponse {
    pub fn into_json(self) -> Result<Value, DispatchError> {
        match self {
            DispatchResponse::Json(value) => Ok(value),
            DispatchResponse::Bytes(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DispatchError::Decode(format!("expected JSON body: {}", e))),
        }
    }

    /// Deserialize a JSON body into a typed response.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T, DispatchError> {
        serde_json::from_value(self.into_json()?)
            .map_err(|e| DispatchError::Decode(e.to_string()))
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            DispatchResponse::Bytes(bytes) => bytes,
            DispatchResponse::Json(value) => Bytes::from(value.to_string()),
        }
    }
}

/// Rate-limited HTTP dispatcher shared by all backend adapters
pub struct Dispatcher {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, rate_limiter))
    }

    pub fn with_client(client: Client, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Perform one call against `backend`.
    pub async fn call(
        &self,
        backend: &BackendDescriptor,
        request: DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        self.rate_limiter.acquire(&backend.name).await;

        let url = backend.url_for(&request.path);
        debug!(backend = %backend.name, method = %request.method, url = %url, "Dispatching call");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(request.timeout);

        if request.authenticate {
            if let Some(credentials) = &backend.credentials {
                builder = builder.bearer_auth(credentials);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|e| {
            let err = classify_transport_error(&e);
            error!(backend = %backend.name, url = %url, error = %err, "Backend call failed");
            err
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
            error!(
                backend = %backend.name,
                url = %url,
                status = status.as_u16(),
                body = %excerpt,
                "Backend returned error status"
            );
            return Err(DispatchError::Remote {
                status: status.as_u16(),
                body: excerpt,
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        debug!(backend = %backend.name, status = status.as_u16(), bytes = body.len(), "Backend call succeeded");

        if is_json {
            let value = serde_json::from_slice(&body)
                .map_err(|e| DispatchError::Decode(format!("invalid JSON from {}: {}", url, e)))?;
            Ok(DispatchResponse::Json(value))
        } else {
            Ok(DispatchResponse::Bytes(body))
        }
    }
}

fn classify_transport_error(error: &reqwest::Error) -> DispatchError {
    if error.is_timeout() {
        DispatchError::Timeout
    } else if error.is_decode() {
        DispatchError::Decode(error.to_string())
    } else {
        DispatchError::Transport(error.to_string())
    }
}
