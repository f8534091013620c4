//! Backend Adapter Abstraction
//!
//! Uniform submit/poll/fetch lifecycle over interchangeable compute backends: a
//! local GPU job service (submit-then-poll) and cloud image APIs (synchronous
//! response wrapped in an already-completed job). Adapters hold no connection
//! state; every outbound call goes through the shared `Dispatcher`.

use crate::dispatch::Dispatcher;
use crate::error::GenerationError;
use crate::types::{BackendDescriptor, Resolution, SceneRequest};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

pub mod cloud;
pub mod local;
pub mod poll;
pub mod request;

pub use cloud::CloudApiAdapter;
pub use local::LocalComputeAdapter;
pub use poll::{poll_until, PollCheck, PollPolicy};
pub use request::{enhance_prompt, CloudImageRequest, LocalJobRequest, LoraSpec};

/// Lifecycle of a backend job
///
/// `Submitted → Polling → {Completed | Failed | TimedOut}`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut)
    }

    fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Submitted => next != JobStatus::Submitted,
            JobStatus::Polling => next != JobStatus::Submitted,
            _ => false,
        }
    }
}

/// Where a finished result can be retrieved from
#[derive(Clone, PartialEq, Eq)]
pub enum ResultRef {
    /// Backend-side identifier (e.g. an output filename)
    Remote(String),
    /// Absolute URL to download
    Url(String),
    /// Payload already delivered with the response
    Inline(Bytes),
}

impl fmt::Debug for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultRef::Remote(id) => f.debug_tuple("Remote").field(id).finish(),
            ResultRef::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ResultRef::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
        }
    }
}

/// One in-flight backend job; the handle returned by `submit`
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub job_id: String,
    pub backend_name: String,
    pub status: JobStatus,
    pub submitted_at: Instant,
    pub result_ref: Option<ResultRef>,
}

impl GenerationJob {
    pub fn submitted(job_id: impl Into<String>, backend_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            backend_name: backend_name.into(),
            status: JobStatus::Submitted,
            submitted_at: Instant::now(),
            result_ref: None,
        }
    }

    /// A job whose result arrived with the submit response.
    pub fn completed(
        job_id: impl Into<String>,
        backend_name: impl Into<String>,
        result: ResultRef,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            backend_name: backend_name.into(),
            status: JobStatus::Completed,
            submitted_at: Instant::now(),
            result_ref: Some(result),
        }
    }

    /// Apply a status transition. Returns `false` and leaves the job unchanged
    /// when the transition is not allowed.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Process-unique identifier for jobs the backend did not name.
    pub fn synthetic_id(backend_name: &str) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        format!("{}-sync-{}", backend_name, COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Terminal result of a poll loop
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(ResultRef),
    Failed(String),
    TimedOut { waited: std::time::Duration },
}

/// Backend-specific wire payload produced by `prepare`
#[derive(Debug, Clone)]
pub enum BackendPayload {
    Local(LocalJobRequest),
    Cloud(CloudImageRequest),
}

/// A compute backend able to turn a scene into image bytes
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Backend identity folded into cache keys.
    fn mode(&self) -> String {
        let descriptor = self.descriptor();
        format!("{}:{}", descriptor.kind, descriptor.name)
    }

    /// Transform a scene into this backend's wire format.
    fn prepare(
        &self,
        scene: &SceneRequest,
        reference_image: &[u8],
        resolution: Resolution,
    ) -> Result<BackendPayload, GenerationError>;

    /// Hand the payload to the backend.
    async fn submit(
        &self,
        dispatcher: &Dispatcher,
        payload: BackendPayload,
    ) -> Result<GenerationJob, GenerationError>;

    /// Drive the job to a terminal state.
    async fn poll(
        &self,
        dispatcher: &Dispatcher,
        job: &mut GenerationJob,
        policy: &PollPolicy,
    ) -> PollOutcome;

    /// Retrieve the final image bytes.
    async fn fetch(
        &self,
        dispatcher: &Dispatcher,
        result: &ResultRef,
    ) -> Result<Bytes, GenerationError>;

    /// Release backend-held resources for an abandoned job.
    async fn cancel(&self, _dispatcher: &Dispatcher, _job: &GenerationJob) {}
}

/// Outcome for a job that is already terminal when `poll` is called.
pub(crate) fn settled_outcome(job: &GenerationJob) -> Option<PollOutcome> {
    match (job.status, &job.result_ref) {
        (JobStatus::Completed, Some(result)) => Some(PollOutcome::Completed(result.clone())),
        (JobStatus::Completed, None) => Some(PollOutcome::Failed(
            "job completed without a result reference".to_string(),
        )),
        (JobStatus::Failed, _) => Some(PollOutcome::Failed("job already failed".to_string())),
        (JobStatus::TimedOut, _) => Some(PollOutcome::TimedOut {
            waited: job.submitted_at.elapsed(),
        }),
        _ => None,
    }
}
