//! Scene generation
//!
//! The coordinator is the only entry point callers use: it turns a
//! `SceneRequest` into an image on disk, consulting the cache first and falling
//! back to a placeholder when a backend cannot deliver.

pub mod coordinator;
pub mod locks;
pub mod placeholder;

pub use coordinator::{
    GeneratedScene, GenerationCoordinator, GenerationSettings, GenerationStats, SceneOrigin,
};
pub use locks::KeyLocks;
pub use placeholder::render_placeholder;
