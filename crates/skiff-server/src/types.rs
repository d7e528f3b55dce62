//! Request and response types for the command API.

use serde::{Deserialize, Serialize};
use skiff_core::CoreError;

/// A command, tagged by `operation`.
///
/// ```json
/// {"operation": "start", "requester": "42", "name": "VPS_alice_k3J9xQ2a"}
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Command {
    /// Create a sandbox (admin).
    Provision(ProvisionParams),
    /// Start a stopped sandbox.
    Start(TargetParams),
    /// Stop a sandbox.
    Stop(TargetParams),
    /// Stop then start a sandbox.
    Restart(TargetParams),
    /// Capture a new session credential.
    RegenerateCredential(TargetParams),
    /// Record plus live status.
    Inspect(TargetParams),
    /// The owner's sandboxes.
    List(TargetParams),
    /// Every sandbox (admin).
    ListAll(RequesterParams),
    /// Ask to delete one sandbox.
    RequestDelete(TargetParams),
    /// Ask to delete every sandbox (admin).
    RequestDeleteAll(RequesterParams),
    /// Remove orphaned containers (admin).
    Reconcile(RequesterParams),
    /// Host and per-sandbox usage (admin).
    NodeStats(RequesterParams),
}

impl Command {
    /// Operation name, as sent on the wire.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Provision(_) => "provision",
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Restart(_) => "restart",
            Self::RegenerateCredential(_) => "regenerate_credential",
            Self::Inspect(_) => "inspect",
            Self::List(_) => "list",
            Self::ListAll(_) => "list_all",
            Self::RequestDelete(_) => "request_delete",
            Self::RequestDeleteAll(_) => "request_delete_all",
            Self::Reconcile(_) => "reconcile",
            Self::NodeStats(_) => "node_stats",
        }
    }

    /// User issuing the command.
    pub fn requester(&self) -> &str {
        match self {
            Self::Provision(p) => &p.requester,
            Self::Start(t)
            | Self::Stop(t)
            | Self::Restart(t)
            | Self::RegenerateCredential(t)
            | Self::Inspect(t)
            | Self::List(t)
            | Self::RequestDelete(t) => &t.requester,
            Self::ListAll(r) | Self::RequestDeleteAll(r) | Self::Reconcile(r) | Self::NodeStats(r) => {
                &r.requester
            }
        }
    }
}

/// Parameters for provisioning.
#[derive(Debug, Deserialize)]
pub struct ProvisionParams {
    /// Admin issuing the request.
    pub requester: String,

    /// User the sandbox is for (default: requester).
    #[serde(default)]
    pub owner: Option<String>,

    /// Explicit sandbox name (default: generated).
    #[serde(default)]
    pub name: Option<String>,

    /// `ubuntu` or `debian` (default: ubuntu).
    #[serde(default)]
    pub os: Option<String>,

    /// RAM in GiB.
    #[serde(default)]
    pub ram_gib: Option<u32>,

    /// CPU count.
    #[serde(default)]
    pub cpus: Option<u32>,

    /// Relative expiry such as `7d`.
    #[serde(default)]
    pub expiry: Option<String>,

    /// Display name used in the generated sandbox name.
    #[serde(default)]
    pub requester_name: Option<String>,
}

/// Parameters addressing one owner's sandbox.
#[derive(Debug, Deserialize)]
pub struct TargetParams {
    /// User issuing the request.
    pub requester: String,

    /// Owner of the sandbox (default: requester).
    #[serde(default)]
    pub owner: Option<String>,

    /// Sandbox name (default: the owner's first sandbox).
    #[serde(default)]
    pub name: Option<String>,
}

impl TargetParams {
    /// Owner, falling back to the requester.
    pub fn owner(&self) -> &str {
        self.owner.as_deref().unwrap_or(&self.requester)
    }
}

/// Parameters for commands that only need the requester.
#[derive(Debug, Deserialize)]
pub struct RequesterParams {
    /// User issuing the request.
    pub requester: String,
}

/// Body of `POST /v1/confirmations/{token}`.
#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    /// Whether to go ahead.
    pub approved: bool,

    /// User redeeming the token; must be the one who requested it.
    pub requester: String,
}

/// Uniform response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiResult {
    /// Operation succeeded.
    Success {
        /// Operation-specific result.
        payload: serde_json::Value,
    },
    /// Operation failed.
    Failure {
        /// Stable error kind, e.g. `not_found`.
        error: String,
        /// Text suitable for the end user.
        reason: String,
        /// Detail for operators.
        diagnostic: String,
    },
}

impl ApiResult {
    /// Wrap a serializable payload.
    pub fn success<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self::Success { payload },
            Err(e) => Self::Failure {
                error: "serialization".into(),
                reason: "The result could not be encoded.".into(),
                diagnostic: e.to_string(),
            },
        }
    }

    /// Failure for a malformed request.
    pub fn invalid_request(diagnostic: impl Into<String>) -> Self {
        Self::Failure {
            error: "invalid_request".into(),
            reason: "The request could not be understood.".into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Error kind, if this is a failure.
    pub fn error_kind(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

impl From<&CoreError> for ApiResult {
    fn from(err: &CoreError) -> Self {
        Self::Failure {
            error: err.kind().to_string(),
            reason: err.reason().to_string(),
            diagnostic: err.to_string(),
        }
    }
}
