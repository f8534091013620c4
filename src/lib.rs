//! Madsea: storyboard scene generation core
//!
//! Turns storyboard scenes (reference image, text, style) into generated
//! images through interchangeable compute backends. Results are memoized in a
//! content-addressed cache, outbound calls are rate limited per backend, and a
//! scene whose generation fails still yields a placeholder image so batch
//! callers always get one output per scene.

pub mod backend;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod logging;
pub mod types;

pub use backend::{BackendAdapter, CloudApiAdapter, LocalComputeAdapter};
pub use cache::{CacheKey, CacheStore};
pub use config::{ConfigLoader, MadseaConfig};
pub use dispatch::{Dispatcher, RateLimiter};
pub use error::{CacheError, ConfigError, DispatchError, GenerationError};
pub use generation::{GeneratedScene, GenerationCoordinator, GenerationStats, SceneOrigin};
pub use types::{BackendDescriptor, BackendKind, RateLimit, Resolution, SceneRequest, StyleParams};
