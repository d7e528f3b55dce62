//! Error types for skiff-core.

use skiff_runtime::RuntimeError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for skiff-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure to capture a credential from the session multiplexer.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// No session line appeared within the allowed time.
    #[error("no session line within {0:?}")]
    TimedOut(Duration),

    /// The output ended without a session line.
    #[error("session output closed before a session line was seen")]
    StreamClosed,

    /// The multiplexer process could not be launched.
    #[error("failed to launch session multiplexer: {0}")]
    Launch(String),
}

/// Failure of the backing record medium.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the store file failed.
    #[error("record store I/O failure at {}: {source}", .path.display())]
    Io {
        /// Store file (or its temporary sibling).
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Errors that can occur during lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from the container runtime
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Credential extraction failed
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Record store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No record matches the lookup key
    #[error("no sandbox {0}")]
    NotFound(String),

    /// Requester is not allowed to run the operation
    #[error("{requester} may not {operation}")]
    PermissionDenied {
        /// Requesting user id
        requester: String,
        /// Operation that was refused
        operation: &'static str,
    },

    /// A sandbox with this name is already recorded
    #[error("sandbox name {0} already in use")]
    Conflict(String),

    /// Owner already holds the maximum number of sandboxes
    #[error("owner {owner} already has {limit} sandbox(es)")]
    QuotaExceeded {
        /// Owner id
        owner: String,
        /// Configured limit
        limit: usize,
    },

    /// A value cannot be stored as a record field
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// OS tag not in the image table
    #[error("unknown OS tag {0:?}")]
    UnknownOs(String),

    /// Expiry string could not be parsed
    #[error("invalid expiry {0:?}")]
    InvalidExpiry(String),

    /// Confirmation token unknown, expired or already used
    #[error("unknown or expired confirmation token")]
    UnknownConfirmation,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Runtime(e) => match e {
                RuntimeError::CreationFailed { .. } => "runtime.creation_failed",
                RuntimeError::StartFailed { .. } => "runtime.start_failed",
                RuntimeError::StopFailed { .. } => "runtime.stop_failed",
                RuntimeError::RemoveFailed { .. } => "runtime.remove_failed",
                RuntimeError::QueryFailed(_) => "runtime.query_failed",
                RuntimeError::InvalidSpec(_) => "runtime.invalid_spec",
            },
            Self::Extraction(e) => match e {
                ExtractionError::TimedOut(_) => "extraction.timed_out",
                ExtractionError::StreamClosed => "extraction.stream_closed",
                ExtractionError::Launch(_) => "extraction.launch_failed",
            },
            Self::Store(_) => "store.io_failure",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Conflict(_) => "conflict",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InvalidField { .. } => "invalid_field",
            Self::UnknownOs(_) => "unknown_os",
            Self::InvalidExpiry(_) => "invalid_expiry",
            Self::UnknownConfirmation => "unknown_confirmation",
            Self::Config(_) => "config",
        }
    }

    /// Human-readable reason suitable for showing to the requesting user.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Runtime(e) => match e {
                RuntimeError::CreationFailed { .. } => "Error creating the sandbox container.",
                RuntimeError::StartFailed { .. } => "Error starting the instance.",
                RuntimeError::StopFailed { .. } => "Failed to stop the instance.",
                RuntimeError::RemoveFailed { .. } => "Failed to delete the instance.",
                RuntimeError::QueryFailed(_) => "The container runtime could not be queried.",
                RuntimeError::InvalidSpec(_) => "The requested sandbox configuration is invalid.",
            },
            Self::Extraction(_) => "Failed to establish an SSH session.",
            Self::Store(_) => "The sandbox registry could not be updated.",
            Self::NotFound(_) => "No instance found with that name for your user.",
            Self::PermissionDenied { .. } => "You don't have permission to use this command.",
            Self::Conflict(_) => "An instance with that name already exists.",
            Self::QuotaExceeded { .. } => "You have reached the maximum number of instances.",
            Self::InvalidField { .. } => "The request contains a value that cannot be stored.",
            Self::UnknownOs(_) => "Unsupported operating system.",
            Self::InvalidExpiry(_) => "Invalid expiry; use forms like 1d, 2h, 30m, 45s, 1y or 3M.",
            Self::UnknownConfirmation => "This confirmation has expired or was already used.",
            Self::Config(_) => "The service is misconfigured.",
        }
    }
}
