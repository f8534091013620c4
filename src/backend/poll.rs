//! Cooperative poll loop for job-style backends.
//! Sleeps between checks on the runtime timer and honours a cancellation token.

use crate::backend::{GenerationJob, JobStatus, PollOutcome, ResultRef};
use crate::error::DispatchError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a single status check
#[derive(Debug, Clone, PartialEq)]
pub enum PollCheck {
    Pending,
    Completed(ResultRef),
    Failed(String),
}

/// Spacing, budget and cancellation for one poll loop
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Run `check` every `policy.interval` until it reports a terminal state, the
/// budget is spent, or the policy is cancelled.
///
/// Transient dispatch errors are logged and polling continues; any other error
/// fails the job. Each check is bounded by the deadline plus one interval, so
/// the loop ends within `timeout ± interval`.
pub async fn poll_until<F, Fut>(
    job: &mut GenerationJob,
    policy: &PollPolicy,
    mut check: F,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollCheck, DispatchError>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut attempts = 0u32;

    loop {
        job.advance(JobStatus::Polling);
        attempts += 1;

        let checked = tokio::select! {
            _ = policy.cancel.cancelled() => {
                job.advance(JobStatus::Failed);
                return PollOutcome::Failed("polling cancelled".to_string());
            }
            checked = timeout_at(deadline + policy.interval, check()) => checked,
        };

        match checked {
            Ok(Ok(PollCheck::Pending)) => {
                debug!(job_id = %job.job_id, backend = %job.backend_name, attempts, "Job still pending");
            }
            Ok(Ok(PollCheck::Completed(result))) => {
                job.advance(JobStatus::Completed);
                job.result_ref = Some(result.clone());
                debug!(job_id = %job.job_id, backend = %job.backend_name, attempts, "Job completed");
                return PollOutcome::Completed(result);
            }
            Ok(Ok(PollCheck::Failed(reason))) => {
                job.advance(JobStatus::Failed);
                return PollOutcome::Failed(reason);
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!(
                    job_id = %job.job_id,
                    backend = %job.backend_name,
                    error = %e,
                    "Status check failed, will retry"
                );
            }
            Ok(Err(e)) => {
                job.advance(JobStatus::Failed);
                return PollOutcome::Failed(e.to_string());
            }
            Err(_elapsed) => {
                job.advance(JobStatus::TimedOut);
                return PollOutcome::TimedOut {
                    waited: start.elapsed(),
                };
            }
        }

        let now = Instant::now();
        if now >= deadline {
            job.advance(JobStatus::TimedOut);
            return PollOutcome::TimedOut {
                waited: now.duration_since(start),
            };
        }

        let nap = policy.interval.min(deadline - now);
        tokio::select! {
            _ = policy.cancel.cancelled() => {
                job.advance(JobStatus::Failed);
                return PollOutcome::Failed("polling cancelled".to_string());
            }
            _ = sleep(nap) => {}
        }
    }
}
