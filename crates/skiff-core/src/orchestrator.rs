//! Lifecycle orchestration.
//!
//! The [`Orchestrator`] ties the record store, the container runtime and the
//! session extractor together. It is the only component that mutates the
//! store, and it never holds the store lock while talking to the runtime.

use crate::config::OrchestratorConfig;
use crate::confirm::{ConfirmationRegistry, PendingAction};
use crate::error::{CoreError, Result};
use crate::expiry::format_expiry;
use crate::naming;
use crate::os::OsKind;
use crate::record::{validate_field, SandboxRecord};
use crate::session::SessionExtractor;
use crate::stats::{self, NodeOverview, SandboxStats};
use crate::store::RecordStore;
use serde::Serialize;
use skiff_runtime::{ContainerRuntime, ContainerSpec};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Observed lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Request accepted, nothing created yet.
    Requested,
    /// Container created, waiting for a credential.
    Provisioning,
    /// Running with a recorded credential.
    Active,
    /// Container stopped; record kept.
    Stopped,
    /// Removal in progress.
    Deleting,
    /// Container and record gone.
    Deleted,
    /// Provisioning failed; nothing recorded.
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "Requested"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Active => write!(f, "Active"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Parameters for [`Orchestrator::provision`].
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Admin asking for the sandbox; recorded as creator.
    pub requester: String,
    /// User the sandbox is for.
    pub owner: String,
    /// Explicit name; generated when absent.
    pub name: Option<String>,
    /// Base image.
    pub os: OsKind,
    /// RAM in GiB; clamped to the configured cap.
    pub ram_gib: Option<u32>,
    /// CPU count; clamped to the configured cap.
    pub cpus: Option<u32>,
    /// Relative expiry such as `7d`.
    pub expiry: Option<String>,
    /// Display name used when generating the sandbox name.
    pub requester_name: Option<String>,
}

impl ProvisionRequest {
    /// Request with defaults for everything but the principals.
    pub fn new(requester: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            owner: owner.into(),
            name: None,
            os: OsKind::default(),
            ram_gib: None,
            cpus: None,
            expiry: None,
            requester_name: None,
        }
    }
}

/// Result of a successful provision.
#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    /// Always `Active`.
    pub state: LifecycleState,
    /// Stored record, including the credential.
    pub record: SandboxRecord,
}

/// Credential obtained while starting a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialOutcome {
    /// A new credential was captured and recorded.
    Fresh {
        /// Connection string.
        credential: String,
    },
    /// A new credential was captured but the store could not be updated;
    /// the stored record still holds the previous one.
    Unrecorded {
        /// Connection string.
        credential: String,
        /// Why the store update failed.
        reason: String,
    },
    /// The sandbox runs but no credential could be captured.
    Unavailable {
        /// Why extraction failed.
        reason: String,
    },
}

/// Result of start and restart.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    /// Sandbox name.
    pub name: String,
    /// Always `Active`.
    pub state: LifecycleState,
    /// Credential, or why there is none.
    pub credential: CredentialOutcome,
}

/// Result of stop.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    /// Sandbox name.
    pub name: String,
    /// State after the operation.
    pub state: LifecycleState,
}

/// Result of credential regeneration.
#[derive(Debug, Clone, Serialize)]
pub struct Regenerated {
    /// Sandbox name.
    pub name: String,
    /// New connection string.
    pub credential: String,
}

/// A delete waiting for confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteRequest {
    /// Token to pass to [`Orchestrator::confirm`].
    pub token: Uuid,
    /// What will happen on confirmation.
    pub action: PendingAction,
    /// Seconds until the token expires.
    pub expires_in_secs: u64,
}

/// Per-item outcome of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Sandboxes whose container was removed.
    pub removed: Vec<String>,
    /// Sandboxes whose container could not be removed.
    pub failed: Vec<String>,
    /// Records dropped from the store.
    pub records_cleared: usize,
}

/// Outcome of a confirmation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Confirmation {
    /// The requester declined; nothing changed.
    Cancelled,
    /// The delete ran.
    Deleted(DeletionReport),
}

/// Outcome of orphan reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Managed runtime names seen.
    pub scanned: usize,
    /// Orphans removed.
    pub removed: Vec<String>,
    /// Orphans that could not be removed.
    pub failed: Vec<String>,
}

/// Record plus live status.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    /// Stored record.
    pub record: SandboxRecord,
    /// Live status and usage.
    pub stats: SandboxStats,
}

/// Coordinates sandbox lifecycles across the runtime and the record store.
///
/// # Thread Safety
///
/// The orchestrator is shared behind an `Arc` and serves concurrent callers.
/// Store mutations are serialized by the store. Provisions in progress are
/// reserved by name and counted per owner, so concurrent requests can neither
/// claim the same name nor overrun the owner quota.
pub struct Orchestrator {
    config: OrchestratorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    store: RecordStore,
    extractor: SessionExtractor,
    confirmations: ConfirmationRegistry,
    in_flight: Mutex<InFlight>,
    admission: tokio::sync::Mutex<()>,
}

// Provisions between admission and their final append or cleanup.
#[derive(Debug, Default)]
struct InFlight {
    names: HashSet<String>,
    owners: HashMap<String, usize>,
}

impl InFlight {
    fn for_owner(&self, owner: &str) -> usize {
        self.owners.get(owner).copied().unwrap_or(0)
    }
}

// Releases a provisioning slot on drop.
struct Reservation<'a> {
    in_flight: &'a Mutex<InFlight>,
    name: String,
    owner: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };
        in_flight.names.remove(&self.name);
        if let Some(count) = in_flight.owners.get_mut(&self.owner) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.owners.remove(&self.owner);
            }
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if `config` does not validate.
    pub fn new(
        config: OrchestratorConfig,
        runtime: Arc<dyn ContainerRuntime>,
        store: RecordStore,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            backend = runtime.backend_name(),
            store = %store.path().display(),
            admins = config.access.len(),
            "Creating orchestrator"
        );
        let extractor = SessionExtractor::new(
            config.session_command.clone(),
            config.session_marker.clone(),
            config.session_timeout,
        );
        if config.access.is_empty() {
            tracing::warn!("No admins configured; admin-only operations will be refused");
        }
        let confirmations = ConfirmationRegistry::new(config.confirmation_ttl);
        Ok(Self {
            config,
            runtime,
            store,
            extractor,
            confirmations,
            in_flight: Mutex::new(InFlight::default()),
            admission: tokio::sync::Mutex::new(()),
        })
    }

    /// Get the orchestrator configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get the record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Create a sandbox, capture its credential and record it.
    ///
    /// Admin only. If no credential can be captured, or the record cannot be
    /// written, the container is stopped and removed again and nothing is
    /// recorded.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`, `InvalidField`, `InvalidExpiry`, `Conflict`,
    /// `QuotaExceeded`, runtime creation failures, extraction failures and
    /// store failures.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<Provisioned> {
        self.config
            .access
            .require_admin(&request.requester, "provision")?;
        validate_field("owner", &request.owner)?;
        validate_field("requester", &request.requester)?;
        if request.owner.is_empty() {
            return Err(CoreError::InvalidField {
                field: "owner",
                reason: "must not be empty".into(),
            });
        }

        let name = match &request.name {
            Some(name) => {
                naming::validate(name)?;
                name.clone()
            }
            None => naming::generate(
                request
                    .requester_name
                    .as_deref()
                    .unwrap_or(request.owner.as_str()),
            ),
        };
        let expiry = request.expiry.as_deref().map(format_expiry).transpose()?;

        let _reservation = self.admit(&name, &request.owner).await?;

        let ram = self.config.clamp_ram(request.ram_gib);
        let cpus = self.config.clamp_cpus(request.cpus);
        self.transition(&name, LifecycleState::Requested);

        let spec = ContainerSpec::builder()
            .name(&name)
            .image(request.os.image_ref())
            .memory_gib(ram)
            .cpus(cpus)
            .build()?;
        if let Err(e) = self.runtime.create(&spec).await {
            self.transition(&name, LifecycleState::Failed);
            return Err(e.into());
        }
        self.transition(&name, LifecycleState::Provisioning);

        let credential = match self.capture(&name).await {
            Ok(credential) => credential,
            Err(e) => {
                self.discard(&name).await;
                self.transition(&name, LifecycleState::Failed);
                return Err(e);
            }
        };

        let record = SandboxRecord {
            owner: request.owner,
            name: name.clone(),
            credential,
            ram_limit_gib: Some(ram),
            cpu_limit: Some(cpus),
            creator: request.requester,
            os_label: request.os.display_name().to_string(),
            expiry,
            degraded: false,
        };
        if let Err(e) = self.store.append(&record).await {
            tracing::error!(sandbox = %name, error = %e, "Failed to record sandbox");
            self.discard(&name).await;
            self.transition(&name, LifecycleState::Failed);
            return Err(e.into());
        }

        self.transition(&name, LifecycleState::Active);
        Ok(Provisioned {
            state: LifecycleState::Active,
            record,
        })
    }

    /// Start a stopped sandbox and capture a fresh credential.
    ///
    /// A sandbox that starts but yields no credential is still reported as
    /// started; the reason is attached and the stored credential is kept.
    pub async fn start(&self, owner: &str, name: Option<&str>) -> Result<StartOutcome> {
        let record = self.lookup(owner, name).await?;
        self.runtime.start(&record.name).await?;
        Ok(self.refresh_credential(&record).await)
    }

    /// Stop a sandbox. The record is untouched.
    pub async fn stop(&self, owner: &str, name: Option<&str>) -> Result<Transition> {
        let record = self.lookup(owner, name).await?;
        self.runtime.stop(&record.name).await?;
        self.transition(&record.name, LifecycleState::Stopped);
        Ok(Transition {
            name: record.name,
            state: LifecycleState::Stopped,
        })
    }

    /// Stop then start a sandbox, capturing a fresh credential.
    pub async fn restart(&self, owner: &str, name: Option<&str>) -> Result<StartOutcome> {
        let record = self.lookup(owner, name).await?;
        self.runtime.stop(&record.name).await?;
        self.transition(&record.name, LifecycleState::Stopped);
        self.runtime.start(&record.name).await?;
        Ok(self.refresh_credential(&record).await)
    }

    /// Capture a new credential from a running sandbox.
    ///
    /// Unlike start, failure here is an error and nothing is updated.
    pub async fn regenerate_credential(&self, owner: &str, name: Option<&str>) -> Result<Regenerated> {
        let record = self.lookup(owner, name).await?;
        let credential = self.capture(&record.name).await?;
        self.store
            .replace_matching(
                |r| r.owner == record.owner && r.name == record.name,
                |r| r.with_credential(credential.clone()),
            )
            .await?;
        tracing::info!(sandbox = %record.name, "Credential regenerated");
        Ok(Regenerated {
            name: record.name,
            credential,
        })
    }

    /// Ask to delete one sandbox. Nothing happens until the token is confirmed.
    pub async fn request_delete(
        &self,
        requester: &str,
        owner: &str,
        name: Option<&str>,
    ) -> Result<DeleteRequest> {
        let record = self.lookup(owner, name).await?;
        let action = PendingAction::DeleteOne {
            owner: record.owner,
            name: record.name,
        };
        Ok(self.issue(requester, action).await)
    }

    /// Ask to delete every sandbox. Admin only.
    pub async fn request_delete_all(&self, requester: &str) -> Result<DeleteRequest> {
        self.config.access.require_admin(requester, "delete_all")?;
        Ok(self.issue(requester, PendingAction::DeleteAll).await)
    }

    /// Redeem a confirmation token. The token is consumed either way.
    pub async fn confirm(&self, token: Uuid, requester: &str, approved: bool) -> Result<Confirmation> {
        let action = self.confirmations.take(token, requester).await?;
        if !approved {
            tracing::info!(%token, requester, "Delete cancelled");
            return Ok(Confirmation::Cancelled);
        }

        let report = match action {
            PendingAction::DeleteOne { owner, name } => self.delete_one(&owner, &name).await?,
            PendingAction::DeleteAll => {
                self.config.access.require_admin(requester, "delete_all")?;
                self.delete_all().await?
            }
        };
        Ok(Confirmation::Deleted(report))
    }

    /// Discard a pending request.
    pub async fn cancel(&self, token: Uuid, requester: &str) -> Result<()> {
        self.confirmations.take(token, requester).await?;
        tracing::info!(%token, requester, "Delete cancelled");
        Ok(())
    }

    /// Remove managed containers the store does not know about. Admin only.
    pub async fn reconcile(&self, requester: &str) -> Result<ReconcileReport> {
        self.config.access.require_admin(requester, "reconcile")?;
        self.sweep_orphans().await
    }

    /// Remove managed containers the store does not know about.
    ///
    /// Names outside the managed prefix are never touched. The store is not
    /// modified.
    pub async fn sweep_orphans(&self) -> Result<ReconcileReport> {
        let names = self.runtime.list_names().await?;
        let known: HashSet<String> = self
            .store
            .read_all()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();

        let managed: Vec<String> = names
            .into_iter()
            .filter(|n| naming::is_managed(n, &self.config.managed_prefix))
            .collect();

        let mut report = ReconcileReport {
            scanned: managed.len(),
            ..Default::default()
        };
        for name in managed.into_iter().filter(|n| !known.contains(n)) {
            tracing::info!(sandbox = %name, "Removing orphaned container");
            if self.stop_and_remove(&name).await {
                report.removed.push(name);
            } else {
                report.failed.push(name);
            }
        }

        tracing::info!(
            scanned = report.scanned,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Orphan reconciliation finished"
        );
        Ok(report)
    }

    /// Records owned by `owner`.
    pub async fn list_owned(&self, owner: &str) -> Result<Vec<SandboxRecord>> {
        self.store.records_for(owner).await.map_err(Into::into)
    }

    /// Every record. Admin only.
    pub async fn list_all(&self, requester: &str) -> Result<Vec<SandboxRecord>> {
        self.config.access.require_admin(requester, "list_all")?;
        self.store.read_all().await.map_err(Into::into)
    }

    /// Record plus live status and usage.
    pub async fn inspect(&self, owner: &str, name: Option<&str>) -> Result<Inspection> {
        let record = self.lookup(owner, name).await?;
        let stats = stats::sandbox_stats(self.runtime.as_ref(), &record).await;
        Ok(Inspection { record, stats })
    }

    /// Host usage plus every recorded sandbox. Admin only.
    pub async fn node_overview(&self, requester: &str) -> Result<NodeOverview> {
        self.config.access.require_admin(requester, "node_stats")?;
        let records = self.store.read_all().await?;
        let (host, sandboxes) = tokio::join!(
            stats::host_stats(),
            stats::sandboxes_stats(self.runtime.as_ref(), &records)
        );
        Ok(NodeOverview { host, sandboxes })
    }

    async fn lookup(&self, owner: &str, name: Option<&str>) -> Result<SandboxRecord> {
        let found = match name {
            Some(_) => self.store.find(owner, name).await?,
            // Unnamed lookups never pick a record with no usable name.
            None => self
                .store
                .records_for(owner)
                .await?
                .into_iter()
                .find(|r| !r.name.is_empty()),
        };
        found.ok_or_else(|| {
            CoreError::NotFound(format!("{} for {owner}", name.unwrap_or("(default)")))
        })
    }

    // Check name uniqueness and the owner quota, then reserve a slot. Checks
    // and reservations are serialized so in-flight provisions count.
    async fn admit(&self, name: &str, owner: &str) -> Result<Reservation<'_>> {
        let _admission = self.admission.lock().await;

        let reserved = self.lock_in_flight()?.names.contains(name);
        if reserved || self.store.contains_name(name).await? {
            return Err(CoreError::Conflict(name.to_string()));
        }
        if self.config.max_per_owner > 0 {
            let held = self.store.records_for(owner).await?.len()
                + self.lock_in_flight()?.for_owner(owner);
            if held >= self.config.max_per_owner {
                return Err(CoreError::QuotaExceeded {
                    owner: owner.to_string(),
                    limit: self.config.max_per_owner,
                });
            }
        }

        let mut in_flight = self.lock_in_flight()?;
        in_flight.names.insert(name.to_string());
        *in_flight.owners.entry(owner.to_string()).or_insert(0) += 1;
        Ok(Reservation {
            in_flight: &self.in_flight,
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    fn lock_in_flight(&self) -> Result<std::sync::MutexGuard<'_, InFlight>> {
        self.in_flight
            .lock()
            .map_err(|_| CoreError::Config("provisioning registry poisoned".into()))
    }

    async fn issue(&self, requester: &str, action: PendingAction) -> DeleteRequest {
        let token = self.confirmations.issue(requester, action.clone()).await;
        DeleteRequest {
            token,
            action,
            expires_in_secs: self.config.confirmation_ttl.as_secs(),
        }
    }

    async fn capture(&self, name: &str) -> Result<String> {
        tracing::debug!(
            sandbox = %name,
            timeout_secs = self.extractor.timeout().as_secs(),
            "Waiting for session credential"
        );
        let credential = self.extractor.extract(self.runtime.as_ref(), name).await?;
        validate_field("credential", &credential)?;
        Ok(credential)
    }

    async fn refresh_credential(&self, record: &SandboxRecord) -> StartOutcome {
        let credential = match self.capture(&record.name).await {
            Ok(credential) => {
                let updated = self
                    .store
                    .replace_matching(
                        |r| r.owner == record.owner && r.name == record.name,
                        |r| r.with_credential(credential.clone()),
                    )
                    .await;
                match updated {
                    Ok(_) => CredentialOutcome::Fresh { credential },
                    Err(e) => {
                        tracing::error!(sandbox = %record.name, error = %e, "Credential not recorded");
                        CredentialOutcome::Unrecorded {
                            credential,
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(sandbox = %record.name, error = %e, "Started without a credential");
                CredentialOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        self.transition(&record.name, LifecycleState::Active);
        StartOutcome {
            name: record.name.clone(),
            state: LifecycleState::Active,
            credential,
        }
    }

    async fn delete_one(&self, owner: &str, name: &str) -> Result<DeletionReport> {
        self.transition(name, LifecycleState::Deleting);
        if let Err(e) = self.runtime.stop(name).await {
            tracing::warn!(sandbox = %name, error = %e, "Stop before delete failed");
        }
        if let Err(e) = self.runtime.remove(name).await {
            tracing::error!(sandbox = %name, error = %e, "Failed to remove container; record kept");
            return Err(e.into());
        }

        let cleared = self
            .store
            .remove_matching(|r| r.owner == owner && r.name == name)
            .await?;
        self.transition(name, LifecycleState::Deleted);
        Ok(DeletionReport {
            removed: vec![name.to_string()],
            failed: Vec::new(),
            records_cleared: cleared,
        })
    }

    async fn delete_all(&self) -> Result<DeletionReport> {
        let records = self.store.read_all().await?;
        tracing::info!(count = records.len(), "Deleting all sandboxes");

        let mut report = DeletionReport::default();
        for record in records {
            self.transition(&record.name, LifecycleState::Deleting);
            if self.stop_and_remove(&record.name).await {
                self.transition(&record.name, LifecycleState::Deleted);
                report.removed.push(record.name);
            } else {
                report.failed.push(record.name);
            }
        }

        // Cleared even when some removals failed; reconciliation picks them up.
        report.records_cleared = self.store.clear().await?;
        if !report.failed.is_empty() {
            tracing::warn!(failed = ?report.failed, "Containers left behind by delete-all");
        }
        Ok(report)
    }

    /// Best-effort stop + remove. Returns whether the remove succeeded.
    async fn stop_and_remove(&self, name: &str) -> bool {
        if let Err(e) = self.runtime.stop(name).await {
            tracing::warn!(sandbox = %name, error = %e, "Failed to stop container");
        }
        match self.runtime.remove(name).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(sandbox = %name, error = %e, "Failed to remove container");
                false
            }
        }
    }

    async fn discard(&self, name: &str) {
        tracing::warn!(sandbox = %name, "Cleaning up after failed provision");
        if !self.stop_and_remove(name).await {
            tracing::error!(sandbox = %name, "Container left running without a record");
        }
    }

    fn transition(&self, name: &str, state: LifecycleState) {
        tracing::info!(sandbox = %name, state = %state, "Sandbox state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRuntime, Session, FAKE_CREDENTIAL};
    use std::time::Duration;
    use tempfile::TempDir;

    const ADMIN: &str = "u1";

    struct Harness {
        _dir: TempDir,
        runtime: Arc<FakeRuntime>,
        orchestrator: Orchestrator,
    }

    fn harness_with(runtime: FakeRuntime, config: OrchestratorConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(runtime);
        let store = RecordStore::new(dir.path().join("database.txt"));
        let orchestrator = Orchestrator::new(config, runtime.clone(), store).unwrap();
        Harness {
            _dir: dir,
            runtime,
            orchestrator,
        }
    }

    fn harness(runtime: FakeRuntime) -> Harness {
        let config = OrchestratorConfig::builder().admins([ADMIN]).build().unwrap();
        harness_with(runtime, config)
    }

    fn request(owner: &str, name: &str) -> ProvisionRequest {
        ProvisionRequest {
            name: Some(name.to_string()),
            ram_gib: Some(4),
            cpus: Some(2),
            ..ProvisionRequest::new(ADMIN, owner)
        }
    }

    async fn seed(h: &Harness, owner: &str, name: &str) {
        h.orchestrator.provision(request(owner, name)).await.unwrap();
        h.runtime.clear_calls();
    }

    #[tokio::test]
    async fn test_provision_records_sandbox() {
        let h = harness(FakeRuntime::new());
        let result = h
            .orchestrator
            .provision(ProvisionRequest {
                ram_gib: Some(4),
                cpus: Some(2),
                requester_name: Some("alice smith".into()),
                ..ProvisionRequest::new(ADMIN, "u1")
            })
            .await
            .unwrap();

        assert_eq!(result.state, LifecycleState::Active);
        let name = result.record.name.clone();
        assert!(name.starts_with("VPS_alice_smith_"));
        assert_eq!(
            result.record.to_line(),
            format!("u1|{name}|{FAKE_CREDENTIAL}|4|2|u1|Ubuntu 22.04|None")
        );

        let records = h.orchestrator.store().read_all().await.unwrap();
        assert_eq!(records, vec![result.record]);
        assert_eq!(h.runtime.ops(), vec!["create", "exec"]);
    }

    #[tokio::test]
    async fn test_provision_extraction_failure_cleans_up() {
        let h = harness(FakeRuntime::new().with_session(Session::Lines(vec!["noise".into()])));
        let err = h
            .orchestrator
            .provision(request("u2", "VPS_fail"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "extraction.stream_closed");
        assert!(h.orchestrator.store().read_all().await.unwrap().is_empty());
        assert_eq!(h.runtime.ops(), vec!["create", "exec", "stop", "remove"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_extraction_timeout_cleans_up() {
        let config = OrchestratorConfig::builder()
            .admins([ADMIN])
            .session_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let h = harness_with(FakeRuntime::new().with_session(Session::Hang), config);

        let err = h
            .orchestrator
            .provision(request("u2", "VPS_slow"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extraction.timed_out");
        assert_eq!(h.runtime.ops(), vec!["create", "exec", "stop", "remove"]);
        assert!(h.orchestrator.store().read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_create_failure_records_nothing() {
        let h = harness(FakeRuntime::new().failing("create"));
        let err = h
            .orchestrator
            .provision(request("u2", "VPS_a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "runtime.creation_failed");
        assert_eq!(h.runtime.ops(), vec!["create"]);
        assert!(h.orchestrator.store().read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_requires_admin() {
        let h = harness(FakeRuntime::new());
        let err = h
            .orchestrator
            .provision(ProvisionRequest::new("u9", "u9"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provision_name_conflict() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_dup").await;
        let err = h
            .orchestrator
            .provision(request("u3", "VPS_dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ref n) if n == "VPS_dup"));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_provision_same_name() {
        let h = harness(FakeRuntime::new());
        let (a, b) = tokio::join!(
            h.orchestrator.provision(request("u2", "VPS_race")),
            h.orchestrator.provision(request("u3", "VPS_race")),
        );
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(h.orchestrator.store().read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provision_quota() {
        let config = OrchestratorConfig::builder()
            .admins([ADMIN])
            .max_per_owner(1)
            .build()
            .unwrap();
        let h = harness_with(FakeRuntime::new(), config);
        seed(&h, "u2", "VPS_one").await;
        let err = h
            .orchestrator
            .provision(request("u2", "VPS_two"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded { limit: 1, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_provisions_respect_quota() {
        let config = OrchestratorConfig::builder()
            .admins([ADMIN])
            .max_per_owner(1)
            .build()
            .unwrap();
        let h = harness_with(FakeRuntime::new(), config);
        let (a, b) = tokio::join!(
            h.orchestrator.provision(request("u2", "VPS_one")),
            h.orchestrator.provision(request("u2", "VPS_two")),
        );

        assert!(a.is_ok() ^ b.is_ok());
        let err = a.err().or(b.err()).unwrap();
        assert_eq!(err.kind(), "quota_exceeded");
        assert_eq!(h.orchestrator.list_owned("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_provision_releases_quota() {
        let config = OrchestratorConfig::builder()
            .admins([ADMIN])
            .max_per_owner(1)
            .build()
            .unwrap();
        let h = harness_with(FakeRuntime::new().with_session(Session::LaunchFails), config);
        assert!(h.orchestrator.provision(request("u2", "VPS_one")).await.is_err());

        h.runtime.set_session(Session::Lines(vec!["ssh session: ssh ok@host".into()]));
        h.orchestrator.provision(request("u2", "VPS_one")).await.unwrap();
    }

    #[tokio::test]
    async fn test_provision_clamps_resources() {
        let h = harness(FakeRuntime::new());
        let result = h
            .orchestrator
            .provision(ProvisionRequest {
                ram_gib: Some(4096),
                cpus: Some(512),
                os: OsKind::Debian,
                ..request("u2", "VPS_big")
            })
            .await
            .unwrap();
        assert_eq!(result.record.ram_limit_gib, Some(100));
        assert_eq!(result.record.cpu_limit, Some(24));
        assert_eq!(result.record.os_label, "Debian 12");
    }

    #[tokio::test]
    async fn test_provision_rejects_bad_input_before_runtime() {
        let h = harness(FakeRuntime::new());
        let err = h
            .orchestrator
            .provision(ProvisionRequest {
                expiry: Some("soon".into()),
                ..request("u2", "VPS_a")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidExpiry(_)));

        let err = h
            .orchestrator
            .provision(request("u|2", "VPS_a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { field: "owner", .. }));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provision_with_expiry() {
        let h = harness(FakeRuntime::new());
        let result = h
            .orchestrator
            .provision(ProvisionRequest {
                expiry: Some("7d".into()),
                ..request("u2", "VPS_exp")
            })
            .await
            .unwrap();
        assert!(result.record.expiry.is_some());
        assert!(!result.record.to_line().ends_with("|None"));
    }

    #[tokio::test]
    async fn test_start_other_owner_not_found() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_mine").await;
        let err = h
            .orchestrator
            .start("u3", Some("VPS_mine"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_updates_credential() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        h.runtime.set_session(Session::Lines(vec!["ssh session: ssh new@host".into()]));

        let outcome = h.orchestrator.start("u2", None).await.unwrap();
        assert_eq!(
            outcome.credential,
            CredentialOutcome::Fresh {
                credential: "ssh new@host".into()
            }
        );
        let record = h.orchestrator.store().find("u2", None).await.unwrap().unwrap();
        assert_eq!(record.credential, "ssh new@host");
        assert_eq!(h.runtime.ops(), vec!["start", "exec"]);
    }

    #[tokio::test]
    async fn test_start_without_credential_is_partial_success() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        h.runtime.set_session(Session::LaunchFails);

        let outcome = h.orchestrator.start("u2", Some("VPS_a")).await.unwrap();
        assert_eq!(outcome.state, LifecycleState::Active);
        assert!(matches!(outcome.credential, CredentialOutcome::Unavailable { .. }));

        let record = h.orchestrator.store().find("u2", None).await.unwrap().unwrap();
        assert_eq!(record.credential, FAKE_CREDENTIAL);
    }

    #[tokio::test]
    async fn test_start_reports_unrecorded_credential() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        h.runtime.set_session(Session::Lines(vec!["ssh session: ssh new@host".into()]));
        // A directory in the way makes the store rewrite fail.
        let blocker = h.orchestrator.store().path().with_extension("txt.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let outcome = h.orchestrator.start("u2", Some("VPS_a")).await.unwrap();
        match outcome.credential {
            CredentialOutcome::Unrecorded { credential, reason } => {
                assert_eq!(credential, "ssh new@host");
                assert!(!reason.is_empty());
            }
            other => panic!("expected unrecorded credential, got {other:?}"),
        }
        let record = h.orchestrator.store().find("u2", None).await.unwrap().unwrap();
        assert_eq!(record.credential, FAKE_CREDENTIAL);
    }

    #[tokio::test]
    async fn test_default_lookup_skips_nameless_record() {
        let h = harness(FakeRuntime::new());
        std::fs::write(
            h.orchestrator.store().path(),
            "u2|\nu2|VPS_b|ssh b|4|2|u1|Ubuntu 22.04|None\n",
        )
        .unwrap();

        let stopped = h.orchestrator.stop("u2", None).await.unwrap();
        assert_eq!(stopped.name, "VPS_b");
        assert_eq!(h.runtime.calls(), vec!["stop:VPS_b"]);

        std::fs::write(h.orchestrator.store().path(), "u3|\n").unwrap();
        let err = h.orchestrator.stop("u3", None).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_failure_propagates() {
        let h = harness(FakeRuntime::new().failing("start"));
        seed(&h, "u2", "VPS_a").await;
        let err = h.orchestrator.start("u2", None).await.unwrap_err();
        assert_eq!(err.kind(), "runtime.start_failed");
        assert_eq!(h.runtime.ops(), vec!["start"]);
    }

    #[tokio::test]
    async fn test_stop_and_restart() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;

        let stopped = h.orchestrator.stop("u2", Some("VPS_a")).await.unwrap();
        assert_eq!(stopped.state, LifecycleState::Stopped);
        assert_eq!(h.runtime.ops(), vec!["stop"]);

        h.runtime.clear_calls();
        let restarted = h.orchestrator.restart("u2", Some("VPS_a")).await.unwrap();
        assert_eq!(restarted.state, LifecycleState::Active);
        assert_eq!(h.runtime.ops(), vec!["stop", "start", "exec"]);
    }

    #[tokio::test]
    async fn test_regenerate_failure_leaves_record() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        h.runtime.set_session(Session::Lines(Vec::new()));

        let err = h
            .orchestrator
            .regenerate_credential("u2", Some("VPS_a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extraction.stream_closed");
        let record = h.orchestrator.store().find("u2", None).await.unwrap().unwrap();
        assert_eq!(record.credential, FAKE_CREDENTIAL);
    }

    #[tokio::test]
    async fn test_regenerate_rejects_unstorable_credential() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        h.runtime.set_session(Session::Lines(vec!["ssh session: a|b".into()]));

        let err = h
            .orchestrator
            .regenerate_credential("u2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { field: "credential", .. }));
    }

    #[tokio::test]
    async fn test_delete_requires_confirmation() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        seed(&h, "u2", "VPS_b").await;

        let pending = h
            .orchestrator
            .request_delete("u2", "u2", Some("VPS_a"))
            .await
            .unwrap();
        assert!(h.runtime.calls().is_empty());
        assert_eq!(pending.expires_in_secs, 60);

        let outcome = h.orchestrator.confirm(pending.token, "u2", true).await.unwrap();
        let Confirmation::Deleted(report) = outcome else {
            panic!("expected deletion");
        };
        assert_eq!(report.removed, vec!["VPS_a"]);
        assert_eq!(report.records_cleared, 1);
        assert_eq!(h.runtime.calls(), vec!["stop:VPS_a", "remove:VPS_a"]);

        let names: Vec<_> = h
            .orchestrator
            .list_owned("u2")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["VPS_b"]);

        assert!(matches!(
            h.orchestrator.confirm(pending.token, "u2", true).await,
            Err(CoreError::UnknownConfirmation)
        ));
    }

    #[tokio::test]
    async fn test_delete_declined_keeps_record() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        let pending = h.orchestrator.request_delete("u2", "u2", None).await.unwrap();

        let outcome = h.orchestrator.confirm(pending.token, "u2", false).await.unwrap();
        assert!(matches!(outcome, Confirmation::Cancelled));
        assert_eq!(h.orchestrator.list_owned("u2").await.unwrap().len(), 1);
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_consumes_token() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        let pending = h.orchestrator.request_delete("u2", "u2", None).await.unwrap();
        h.orchestrator.cancel(pending.token, "u2").await.unwrap();
        assert!(h.orchestrator.confirm(pending.token, "u2", true).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_remove_failure_keeps_record() {
        let h = harness(FakeRuntime::new().failing("remove"));
        seed(&h, "u2", "VPS_a").await;
        let pending = h.orchestrator.request_delete("u2", "u2", None).await.unwrap();

        let err = h
            .orchestrator
            .confirm(pending.token, "u2", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "runtime.remove_failed");
        assert_eq!(h.orchestrator.list_owned("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_stop_failure_is_not_fatal() {
        let h = harness(FakeRuntime::new().failing("stop"));
        seed(&h, "u2", "VPS_a").await;
        let pending = h.orchestrator.request_delete("u2", "u2", None).await.unwrap();
        h.orchestrator.confirm(pending.token, "u2", true).await.unwrap();
        assert!(h.orchestrator.list_owned("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let h = harness(FakeRuntime::new());
        for (owner, name) in [("u2", "VPS_a"), ("u3", "VPS_b"), ("u3", "VPS_c")] {
            seed(&h, owner, name).await;
        }

        assert!(matches!(
            h.orchestrator.request_delete_all("u2").await,
            Err(CoreError::PermissionDenied { .. })
        ));

        let pending = h.orchestrator.request_delete_all(ADMIN).await.unwrap();
        let Confirmation::Deleted(report) =
            h.orchestrator.confirm(pending.token, ADMIN, true).await.unwrap()
        else {
            panic!("expected deletion");
        };
        assert_eq!(report.removed.len(), 3);
        assert!(report.failed.is_empty());
        assert_eq!(report.records_cleared, 3);
        assert!(h.orchestrator.store().read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_clears_despite_failures() {
        let h = harness(FakeRuntime::new().failing("remove"));
        seed(&h, "u2", "VPS_a").await;
        seed(&h, "u3", "VPS_b").await;

        let pending = h.orchestrator.request_delete_all(ADMIN).await.unwrap();
        let Confirmation::Deleted(report) =
            h.orchestrator.confirm(pending.token, ADMIN, true).await.unwrap()
        else {
            panic!("expected deletion");
        };
        assert!(report.removed.is_empty());
        assert_eq!(report.failed, vec!["VPS_a", "VPS_b"]);
        assert_eq!(report.records_cleared, 2);
        assert!(h.orchestrator.store().read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_removes_only_orphans() {
        let h = harness(FakeRuntime::new().with_listing(&["VPS_A", "VPS_B", "VPS_C", "postgres"]));
        seed(&h, "u2", "VPS_A").await;
        let before = h.orchestrator.store().read_all().await.unwrap();

        let report = h.orchestrator.reconcile(ADMIN).await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, vec!["VPS_B", "VPS_C"]);
        assert!(report.failed.is_empty());
        assert_eq!(
            h.runtime.calls(),
            vec!["list:*", "stop:VPS_B", "remove:VPS_B", "stop:VPS_C", "remove:VPS_C"]
        );
        assert_eq!(h.orchestrator.store().read_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reconcile_requires_admin() {
        let h = harness(FakeRuntime::new().with_listing(&["VPS_X"]));
        assert!(matches!(
            h.orchestrator.reconcile("u2").await,
            Err(CoreError::PermissionDenied { operation: "reconcile", .. })
        ));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_list_failure() {
        let h = harness(FakeRuntime::new().failing("list"));
        let err = h.orchestrator.sweep_orphans().await.unwrap_err();
        assert_eq!(err.kind(), "runtime.query_failed");
    }

    #[tokio::test]
    async fn test_inspect_and_listing() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        seed(&h, "u3", "VPS_b").await;

        let inspection = h.orchestrator.inspect("u2", None).await.unwrap();
        assert_eq!(inspection.record.name, "VPS_a");
        assert_eq!(inspection.stats.memory, "45.2MiB / 4GB");

        assert_eq!(h.orchestrator.list_owned("u3").await.unwrap().len(), 1);
        assert_eq!(h.orchestrator.list_all(ADMIN).await.unwrap().len(), 2);
        assert!(h.orchestrator.list_all("u2").await.is_err());
    }

    #[tokio::test]
    async fn test_node_overview() {
        let h = harness(FakeRuntime::new());
        seed(&h, "u2", "VPS_a").await;
        let overview = h.orchestrator.node_overview(ADMIN).await.unwrap();
        assert_eq!(overview.sandboxes.len(), 1);
        assert!(h.orchestrator.node_overview("u2").await.is_err());
    }
}
