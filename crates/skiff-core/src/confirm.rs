//! Pending confirmations for destructive operations.
//!
//! Deletes are two-phase: the request issues a token and nothing happens
//! until the same requester confirms it. Tokens are single-use and expire.

use crate::error::{CoreError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Default lifetime of an unconfirmed request.
pub const DEFAULT_CONFIRMATION_TTL: Duration = Duration::from_secs(60);

/// Action waiting on a confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PendingAction {
    /// Delete one sandbox.
    DeleteOne {
        /// Owner of the record.
        owner: String,
        /// Sandbox name.
        name: String,
    },
    /// Delete every sandbox and clear the store.
    DeleteAll,
}

#[derive(Debug)]
struct Pending {
    requester: String,
    action: PendingAction,
    issued_at: Instant,
}

/// Token → pending action map.
#[derive(Debug)]
pub struct ConfirmationRegistry {
    ttl: Duration,
    pending: Mutex<HashMap<Uuid, Pending>>,
}

impl Default for ConfirmationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_TTL)
    }
}

impl ConfirmationRegistry {
    /// Create a registry whose tokens live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register `action` for `requester` and return its token.
    pub async fn issue(&self, requester: &str, action: PendingAction) -> Uuid {
        let token = Uuid::new_v4();
        let mut pending = self.pending.lock().await;
        let ttl = self.ttl;
        pending.retain(|_, p| p.issued_at.elapsed() < ttl);
        pending.insert(
            token,
            Pending {
                requester: requester.to_string(),
                action,
                issued_at: Instant::now(),
            },
        );
        tracing::debug!(%token, requester, "Confirmation issued");
        token
    }

    /// Consume `token`. Only the requester that asked may redeem it; a
    /// mismatch leaves the token in place.
    pub async fn take(&self, token: Uuid, requester: &str) -> Result<PendingAction> {
        let mut pending = self.pending.lock().await;
        let entry = pending.get(&token).ok_or(CoreError::UnknownConfirmation)?;

        if entry.issued_at.elapsed() >= self.ttl {
            pending.remove(&token);
            tracing::debug!(%token, "Confirmation expired");
            return Err(CoreError::UnknownConfirmation);
        }
        if entry.requester != requester {
            return Err(CoreError::PermissionDenied {
                requester: requester.to_string(),
                operation: "confirm",
            });
        }

        pending
            .remove(&token)
            .map(|p| p.action)
            .ok_or(CoreError::UnknownConfirmation)
    }

    /// Number of live tokens.
    pub async fn len(&self) -> usize {
        let ttl = self.ttl;
        self.pending
            .lock()
            .await
            .values()
            .filter(|p| p.issued_at.elapsed() < ttl)
            .count()
    }

    /// True if no live tokens remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
