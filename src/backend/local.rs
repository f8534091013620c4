//! Local GPU job service adapter.
//!
//! Wire protocol, relative to the backend endpoint:
//! - `POST submit` with a [`LocalJobRequest`] body, answered by `{"job_id": ...}`
//! - `GET status/{job_id}`, answered by `{"status": ..., "result": ..., "error": ...}`
//! - `GET result/{result}` returning the raw image bytes
//! - `POST cancel/{job_id}` to abandon a job (best effort)

use crate::backend::poll::{poll_until, PollCheck, PollPolicy};
use crate::backend::request::LocalJobRequest;
use crate::backend::{
    settled_outcome, BackendAdapter, BackendPayload, GenerationJob, PollOutcome, ResultRef,
};
use crate::dispatch::{DispatchRequest, DispatchResponse, Dispatcher, Method};
use crate::error::{DispatchError, GenerationError};
use crate::types::{BackendDescriptor, Resolution, SceneRequest};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "prompt_id")]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StatusResponse {
    fn into_check(self) -> PollCheck {
        match self.status.to_ascii_lowercase().as_str() {
            "completed" | "succeeded" | "success" | "done" => match self.result {
                Some(result) if result.starts_with("http://") || result.starts_with("https://") => {
                    PollCheck::Completed(ResultRef::Url(result))
                }
                Some(result) => PollCheck::Completed(ResultRef::Remote(result)),
                None => PollCheck::Failed("job completed without a result".to_string()),
            },
            "failed" | "error" | "cancelled" => PollCheck::Failed(
                self.error
                    .unwrap_or_else(|| format!("backend reported status '{}'", self.status)),
            ),
            _ => PollCheck::Pending,
        }
    }
}

/// Adapter for a self-hosted submit-then-poll job service
pub struct LocalComputeAdapter {
    descriptor: BackendDescriptor,
    request_timeout: Duration,
}

impl LocalComputeAdapter {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn dispatch_error(&self, source: DispatchError) -> GenerationError {
        GenerationError::dispatch(&self.descriptor.name, source)
    }
}

#[async_trait]
impl BackendAdapter for LocalComputeAdapter {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn prepare(
        &self,
        scene: &SceneRequest,
        reference_image: &[u8],
        resolution: Resolution,
    ) -> Result<BackendPayload, GenerationError> {
        let request = LocalJobRequest::builder(scene, reference_image, resolution).build()?;
        Ok(BackendPayload::Local(request))
    }

    async fn submit(
        &self,
        dispatcher: &Dispatcher,
        payload: BackendPayload,
    ) -> Result<GenerationJob, GenerationError> {
        let request = match payload {
            BackendPayload::Local(request) => request,
            BackendPayload::Cloud(_) => {
                return Err(GenerationError::InvalidRequest(format!(
                    "backend '{}' expects a local job payload",
                    self.descriptor.name
                )))
            }
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| GenerationError::InvalidRequest(e.to_string()))?;

        let submitted: SubmitResponse = dispatcher
            .call(
                &self.descriptor,
                DispatchRequest::post_json("submit", body).with_timeout(self.request_timeout),
            )
            .await
            .and_then(DispatchResponse::parse)
            .map_err(|e| self.dispatch_error(e))?;

        info!(
            backend = %self.descriptor.name,
            job_id = %submitted.job_id,
            style = %request.style,
            "Job submitted"
        );
        Ok(GenerationJob::submitted(submitted.job_id, &self.descriptor.name))
    }

    async fn poll(
        &self,
        dispatcher: &Dispatcher,
        job: &mut GenerationJob,
        policy: &PollPolicy,
    ) -> PollOutcome {
        if let Some(outcome) = settled_outcome(job) {
            return outcome;
        }

        let status_path = format!("status/{}", job.job_id);
        let descriptor = &self.descriptor;
        let request_timeout = self.request_timeout;

        let outcome = poll_until(job, policy, move || {
            let request = DispatchRequest::get(status_path.clone()).with_timeout(request_timeout);
            async move {
                let status: StatusResponse = dispatcher.call(descriptor, request).await?.parse()?;
                Ok::<_, DispatchError>(status.into_check())
            }
        })
        .await;

        match &outcome {
            PollOutcome::TimedOut { waited } => {
                warn!(
                    backend = %self.descriptor.name,
                    job_id = %job.job_id,
                    waited_ms = waited.as_millis() as u64,
                    "Job did not finish in time, cancelling"
                );
                self.cancel(dispatcher, job).await;
            }
            PollOutcome::Failed(reason) if policy.cancel.is_cancelled() => {
                debug!(backend = %self.descriptor.name, job_id = %job.job_id, reason = %reason, "Polling cancelled");
                self.cancel(dispatcher, job).await;
            }
            _ => {}
        }
        outcome
    }

    async fn fetch(
        &self,
        dispatcher: &Dispatcher,
        result: &ResultRef,
    ) -> Result<Bytes, GenerationError> {
        let request = match result {
            ResultRef::Inline(bytes) => return Ok(bytes.clone()),
            ResultRef::Remote(id) => DispatchRequest::get(format!("result/{}", id)),
            ResultRef::Url(url) => DispatchRequest::get(url.clone()).without_auth(),
        };

        match dispatcher
            .call(&self.descriptor, request.with_timeout(self.request_timeout))
            .await
            .map_err(|e| self.dispatch_error(e))?
        {
            DispatchResponse::Bytes(bytes) => Ok(bytes),
            DispatchResponse::Json(value) => Err(self.dispatch_error(DispatchError::Decode(format!(
                "expected image bytes, got JSON: {}",
                value
            )))),
        }
    }

    async fn cancel(&self, dispatcher: &Dispatcher, job: &GenerationJob) {
        let request = DispatchRequest::new(Method::POST, format!("cancel/{}", job.job_id))
            .with_timeout(self.request_timeout);
        if let Err(e) = dispatcher.call(&self.descriptor, request).await {
            warn!(
                backend = %self.descriptor.name,
                job_id = %job.job_id,
                error = %e,
                "Failed to cancel job"
            );
        }
    }
}
