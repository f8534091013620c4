//! On-disk cache store
//!
//! One JSON entry per key under the cache root: `{root}/{key_hex}.json`.
//! Results stored through `store_result` live beside it as `{root}/{key_hex}.png`
//! and belong to the cache, so later scene outputs can never overwrite them.
//! The directory is created on first write; a missing directory reads as an
//! empty cache. Read and write failures are logged and degrade to a miss or
//! no-op so that caching never aborts generation.

use crate::cache::key::CacheKey;
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const ENTRY_EXTENSION: &str = "json";
const RESULT_EXTENSION: &str = "png";

/// Persisted record mapping a key to a produced result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub result_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: &CacheKey, result_path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.to_hex(),
            result_path: result_path.into(),
            created_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            // TTL beyond chrono's range never expires
            Err(_) => false,
        }
    }
}

/// Content-addressed memoization store
pub struct CacheStore {
    root: PathBuf,
    ttl: Duration,
    enabled: bool,
    tmp_counter: AtomicU64,
}

impl CacheStore {
    pub fn new<P: AsRef<Path>>(root: P, ttl: Duration, enabled: bool) -> Self {
        let root = root.as_ref().to_path_buf();
        if enabled {
            info!(cache_dir = %root.display(), ttl_secs = ttl.as_secs(), "Cache enabled");
        } else {
            info!("Cache disabled");
        }
        Self {
            root,
            ttl,
            enabled,
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// A store that always misses and ignores writes.
    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), Duration::ZERO, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry.
    ///
    /// Returns a path only if the entry exists, is within TTL and its result file
    /// still exists. Stale, dangling and unreadable entries are evicted.
    pub fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        match self.try_get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                self.evict(key);
                None
            }
        }
    }

    /// Fallible lookup used by `get`.
    pub fn try_get(&self, key: &CacheKey) -> Result<Option<PathBuf>, CacheError> {
        let entry_path = self.entry_path(key);
        if !entry_path.exists() {
            debug!(key = %key, "Cache miss");
            return Ok(None);
        }

        let entry = read_entry(&entry_path)?;
        if entry.key != key.to_hex() {
            return Err(CacheError::Corrupt {
                path: entry_path,
                reason: format!("entry key {} does not match file name", entry.key),
            });
        }

        if entry.is_expired(self.ttl, Utc::now()) {
            debug!(key = %key, "Cache entry expired");
            self.evict(key);
            return Ok(None);
        }

        if !entry.result_path.exists() {
            debug!(
                key = %key,
                result_path = %entry.result_path.display(),
                "Cached result no longer exists"
            );
            self.evict(key);
            return Ok(None);
        }

        debug!(key = %key, "Cache hit");
        Ok(Some(entry.result_path))
    }

    /// Record `result_path` for `key`, replacing any existing entry.
    pub fn set(&self, key: &CacheKey, result_path: &Path) {
        if !self.enabled {
            return;
        }

        if let Err(e) = self.put_entry(&CacheEntry::new(key, result_path)) {
            warn!(key = %key, error = %e, "Cache write failed, continuing without cache");
        }
    }

    /// Copy `bytes` into a cache-owned result file and record it for `key`.
    ///
    /// Returns the stored path, or `None` when the cache is disabled or the
    /// write fails.
    pub fn store_result(&self, key: &CacheKey, bytes: &[u8]) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        match self.try_store_result(key, bytes) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed, continuing without cache");
                None
            }
        }
    }

    /// Fallible form of `store_result`.
    pub fn try_store_result(&self, key: &CacheKey, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.root)?;
        let result_path = self.result_path(key);
        self.write_atomic(&result_path, RESULT_EXTENSION, bytes)?;
        self.put_entry(&CacheEntry::new(key, &result_path))?;
        Ok(result_path)
    }

    /// Persist a prepared entry with an atomic temp-file rename.
    pub fn put_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = CacheKey::from_hex(&entry.key).ok_or_else(|| CacheError::Corrupt {
            path: self.root.clone(),
            reason: format!("invalid key {}", entry.key),
        })?;

        fs::create_dir_all(&self.root)?;

        let serialized =
            serde_json::to_vec_pretty(entry).map_err(|e| CacheError::Serialize(e.to_string()))?;
        self.write_atomic(&self.entry_path(&key), ENTRY_EXTENSION, &serialized)?;

        debug!(key = %entry.key, "Cache entry written");
        Ok(())
    }

    fn write_atomic(&self, path: &Path, extension: &str, bytes: &[u8]) -> Result<(), CacheError> {
        // Unique temp name so concurrent writers of one key never interleave
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path =
            path.with_extension(format!("{}.{}.{}.tmp", extension, std::process::id(), seq));

        if let Err(e) = fs::write(&temp_path, bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove the entry for `key` and its cache-owned result, if any.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let removed = remove_if_present(&self.entry_path(key))?;
        remove_if_present(&self.result_path(key))?;
        Ok(removed)
    }

    /// Delete every entry and cache-owned result. Results stored elsewhere
    /// through `set` are left alone.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files() {
            fs::remove_file(&path)?;
            remove_if_present(&path.with_extension(RESULT_EXTENSION))?;
            removed += 1;
        }
        info!(removed, cache_dir = %self.root.display(), "Cache cleared");
        Ok(removed)
    }

    /// Delete expired, dangling and unreadable entries.
    pub fn prune_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.entry_files() {
            let stale = match read_entry(&path) {
                Ok(entry) => entry.is_expired(self.ttl, now) || !entry.result_path.exists(),
                Err(_) => true,
            };
            if stale {
                fs::remove_file(&path)?;
                remove_if_present(&path.with_extension(RESULT_EXTENSION))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Pruned stale cache entries");
        }
        Ok(removed)
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        if !self.root.exists() {
            return Vec::new();
        }
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION))
            .collect()
    }

    fn evict(&self, key: &CacheKey) {
        if let Err(e) = self.remove(key) {
            warn!(key = %key, error = %e, "Failed to evict cache entry");
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.to_hex(), ENTRY_EXTENSION))
    }

    fn result_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.to_hex(), RESULT_EXTENSION))
    }
}

fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn read_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
