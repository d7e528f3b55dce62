//! Error types for skiff-runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by the container runtime adapter.
///
/// Every variant carries the diagnostic text reported by the runtime
/// (stderr, spawn error or timeout description).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container could not be created.
    #[error("failed to create container {name}: {diagnostic}")]
    CreationFailed { name: String, diagnostic: String },

    /// The container could not be started.
    #[error("failed to start container {name}: {diagnostic}")]
    StartFailed { name: String, diagnostic: String },

    /// The container could not be stopped.
    #[error("failed to stop container {name}: {diagnostic}")]
    StopFailed { name: String, diagnostic: String },

    /// The container could not be removed.
    #[error("failed to remove container {name}: {diagnostic}")]
    RemoveFailed { name: String, diagnostic: String },

    /// A query against the runtime failed (listing, exec launch).
    #[error("runtime query failed: {0}")]
    QueryFailed(String),

    /// The container spec failed validation.
    #[error("invalid container spec: {0}")]
    InvalidSpec(String),
}

impl RuntimeError {
    /// Stable machine-readable kind, used by callers that report errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreationFailed { .. } => "creation_failed",
            Self::StartFailed { .. } => "start_failed",
            Self::StopFailed { .. } => "stop_failed",
            Self::RemoveFailed { .. } => "remove_failed",
            Self::QueryFailed(_) => "query_failed",
            Self::InvalidSpec(_) => "invalid_spec",
        }
    }
}
