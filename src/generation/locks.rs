//! Per-cache-key async locks.
//!
//! Concurrent requests for the same key serialize on one lock so the second
//! caller finds the first caller's cache entry instead of dispatching again.

use crate::cache::CacheKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

/// Held while a key is being generated. Dropping it releases the key.
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: CacheKey) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            // Entries nobody holds or awaits, left by waiters dropped mid-wait
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        drop(self.guard.take());
        // Only the map holds the mutex now: nobody is waiting on this key
        if let Some(lock) = locks.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}
