//! Content-addressable memoization of generated scene images.
//! Maps a deterministic key to a previously produced result path with TTL expiry.

pub mod key;
pub mod store;

pub use key::{compute_content_hash, generate_key, CacheKey, ContentHash};
pub use store::{CacheEntry, CacheStore};
