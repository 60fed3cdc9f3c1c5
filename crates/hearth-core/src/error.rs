use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced to callers of the lifecycle controller. Resource-load
/// failures are not here; they are captured into the corresponding `error`
/// field of the shared state instead.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Call-order contract violation: the named stage of the resource chain
    /// must be loaded before this operation may be invoked.
    #[error("{resource} is not loaded")]
    NotLoaded { resource: &'static str },

    #[error(transparent)]
    Engine(#[from] EngineError),
}
