//! Per-backend sliding-window rate limiting
//!
//! Callers suspend until a slot is free; nothing is ever dropped or rejected.

use crate::types::{BackendDescriptor, RateLimit};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Throttles outbound calls per backend name.
///
/// Each backend owns its own async lock, so a saturated backend only delays
/// its own callers.
#[derive(Default)]
pub struct RateLimiter {
    limits: RwLock<HashMap<String, RateLimit>>,
    windows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<WindowState>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<'a>(backends: impl IntoIterator<Item = &'a BackendDescriptor>) -> Self {
        let limiter = Self::new();
        for backend in backends {
            if let Some(limit) = backend.rate_limit {
                limiter.register(&backend.name, limit);
            }
        }
        limiter
    }

    /// Set or replace the quota for `backend`. Resets its window.
    pub fn register(&self, backend: &str, limit: RateLimit) {
        self.limits.write().insert(backend.to_string(), limit);
        self.windows.lock().remove(backend);
        debug!(backend, limit = limit.limit, period_ms = limit.period.as_millis() as u64, "Rate limit registered");
    }

    pub fn limit_for(&self, backend: &str) -> Option<RateLimit> {
        self.limits.read().get(backend).copied()
    }

    /// Wait for a call slot on `backend`. Returns how long the caller was held.
    ///
    /// Backends without a registered quota are never delayed.
    pub async fn acquire(&self, backend: &str) -> Duration {
        let Some(limit) = self.limit_for(backend) else {
            return Duration::ZERO;
        };
        let max_calls = limit.limit.max(1);

        let window = self.window_for(backend);
        let mut state = window.lock().await;

        let now = Instant::now();
        if now.duration_since(state.window_start) >= limit.period {
            state.count = 0;
            state.window_start = now;
        }

        let mut waited = Duration::ZERO;
        if state.count >= max_calls {
            let wait = limit
                .period
                .saturating_sub(now.duration_since(state.window_start));
            warn!(
                backend,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, delaying call"
            );
            sleep(wait).await;
            waited = wait;
            state.count = 0;
            state.window_start = Instant::now();
        }

        state.count += 1;
        waited
    }

    fn window_for(&self, backend: &str) -> Arc<tokio::sync::Mutex<WindowState>> {
        let mut windows = self.windows.lock();
        Arc::clone(windows.entry(backend.to_string()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }))
        }))
    }
}
