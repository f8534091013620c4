//! Cloud image API adapter.
//!
//! Cloud providers answer the submit call synchronously, so `submit` returns a
//! job that is already `Completed` and `poll` resolves without another request.

use crate::backend::poll::PollPolicy;
use crate::backend::request::CloudImageRequest;
use crate::backend::{
    settled_outcome, BackendAdapter, BackendPayload, GenerationJob, PollOutcome, ResultRef,
};
use crate::dispatch::{DispatchRequest, DispatchResponse, Dispatcher};
use crate::error::{DispatchError, GenerationError};
use crate::types::{BackendDescriptor, Resolution, SceneRequest};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_OPERATION: &str = "images/generations";

/// Adapter for a hosted image-generation API authenticated with a bearer token
pub struct CloudApiAdapter {
    descriptor: BackendDescriptor,
    operation: String,
    model: Option<String>,
    request_timeout: Duration,
}

impl CloudApiAdapter {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            operation: DEFAULT_OPERATION.to_string(),
            model: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn dispatch_error(&self, source: DispatchError) -> GenerationError {
        GenerationError::dispatch(&self.descriptor.name, source)
    }
}

/// Pull the image out of a provider response.
///
/// Accepts `{"data": [{"b64_json" | "url": ...}]}` as well as the same keys (or
/// `image`) at the top level.
fn extract_result(body: &Value) -> Result<ResultRef, DispatchError> {
    let item = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .unwrap_or(body);

    let inline = item
        .get("b64_json")
        .or_else(|| item.get("image"))
        .and_then(Value::as_str);
    if let Some(encoded) = inline {
        return decode_inline(encoded).map(ResultRef::Inline);
    }

    if let Some(url) = item.get("url").and_then(Value::as_str) {
        return Ok(ResultRef::Url(url.to_string()));
    }

    Err(DispatchError::Decode(
        "response carried neither inline image data nor a URL".to_string(),
    ))
}

fn decode_inline(encoded: &str) -> Result<Bytes, DispatchError> {
    // Strip a data-URI prefix such as "data:image/png;base64,"
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    BASE64
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|e| DispatchError::Decode(format!("invalid base64 image: {}", e)))
}

#[async_trait]
impl BackendAdapter for CloudApiAdapter {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        scene: &SceneRequest,
        reference_image: &[u8],
        resolution: Resolution,
    ) -> Result<BackendPayload, GenerationError> {
        if self
            .descriptor
            .credentials
            .as_deref()
            .map_or(true, str::is_empty)
        {
            return Err(GenerationError::AuthMissing(self.descriptor.name.clone()));
        }
        let request = CloudImageRequest::builder(scene, reference_image, resolution)
            .model(self.model.clone())
            .build()?;
        Ok(BackendPayload::Cloud(request))
    }

    async fn submit(
        &self,
        dispatcher: &Dispatcher,
        payload: BackendPayload,
    ) -> Result<GenerationJob, GenerationError> {
        let request = match payload {
            BackendPayload::Cloud(request) => request,
            BackendPayload::Local(_) => {
                return Err(GenerationError::InvalidRequest(format!(
                    "backend '{}' expects a cloud image payload",
                    self.descriptor.name
                )))
            }
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| GenerationError::InvalidRequest(e.to_string()))?;

        let response = dispatcher
            .call(
                &self.descriptor,
                DispatchRequest::post_json(self.operation.clone(), body)
                    .with_timeout(self.request_timeout),
            )
            .await
            .and_then(DispatchResponse::into_json)
            .map_err(|e| self.dispatch_error(e))?;

        let result = extract_result(&response).map_err(|e| self.dispatch_error(e))?;
        let job_id = response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| GenerationJob::synthetic_id(&self.descriptor.name));

        info!(
            backend = %self.descriptor.name,
            job_id = %job_id,
            result = ?result,
            "Cloud generation returned"
        );
        Ok(GenerationJob::completed(job_id, &self.descriptor.name, result))
    }

    async fn poll(
        &self,
        _dispatcher: &Dispatcher,
        job: &mut GenerationJob,
        _policy: &PollPolicy,
    ) -> PollOutcome {
        settled_outcome(job).unwrap_or_else(|| {
            PollOutcome::Failed("cloud job was not completed at submit time".to_string())
        })
    }

    async fn fetch(
        &self,
        dispatcher: &Dispatcher,
        result: &ResultRef,
    ) -> Result<Bytes, GenerationError> {
        let request = match result {
            ResultRef::Inline(bytes) => return Ok(bytes.clone()),
            ResultRef::Url(url) => DispatchRequest::get(url.clone()).without_auth(),
            ResultRef::Remote(id) => DispatchRequest::get(id.clone()),
        };
        let response = dispatcher
            .call(&self.descriptor, request.with_timeout(self.request_timeout))
            .await
            .map_err(|e| self.dispatch_error(e))?;
        Ok(response.into_bytes())
    }
}
