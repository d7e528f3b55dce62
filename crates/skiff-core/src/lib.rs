//! # skiff-core
//!
//! Lifecycle orchestration and session registry for Skiff sandboxes.
//!
//! Skiff hands out disposable, resource-limited Linux containers and gives
//! each one a remote terminal session. This crate owns the flat-file registry
//! of who holds which sandbox, drives the container runtime through every
//! lifecycle transition, and captures the session credential from the tmate
//! process running inside each sandbox.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    skiff-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │  Orchestrator   │────▶│  RecordStore             │    │
//! │  │  - provision()  │     │  owner|name|cred|...     │    │
//! │  │  - start()      │     └──────────────────────────┘    │
//! │  │  - confirm()    │                                     │
//! │  │  - reconcile()  │     ┌──────────────────────────┐    │
//! │  └─────────────────┘────▶│  ConfirmationRegistry    │    │
//! │           │              └──────────────────────────┘    │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │SessionExtractor │────▶│  dyn ContainerRuntime    │    │
//! │  │  "ssh session:" │     │  (from skiff-runtime)    │    │
//! │  └─────────────────┘     └──────────────────────────┘    │
//! │                                       │ docker CLI       │
//! └───────────────────────────────────────┼──────────────────┘
//!                                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │          sandbox container running `tmate -F`            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use skiff_core::{Orchestrator, OrchestratorConfig, ProvisionRequest, RecordStore};
//! use skiff_runtime::{DockerCli, DockerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> skiff_core::Result<()> {
//! let config = OrchestratorConfig::builder()
//!     .store_path("database.txt")
//!     .admins(["1234"])
//!     .build()?;
//! let store = RecordStore::new(&config.store_path);
//! let runtime = Arc::new(DockerCli::new(DockerConfig::default()));
//! let orchestrator = Orchestrator::new(config, runtime, store)?;
//!
//! let created = orchestrator
//!     .provision(ProvisionRequest::new("1234", "5678"))
//!     .await?;
//! println!("{} -> {}", created.record.name, created.record.credential);
//!
//! let pending = orchestrator.request_delete("5678", "5678", None).await?;
//! orchestrator.confirm(pending.token, "5678", true).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Provisioning**: create, capture a credential, record; roll back on failure
//! - **Lifecycle**: start, stop, restart and credential regeneration
//! - **Two-phase deletes**: single-use, expiring confirmation tokens
//! - **Orphan reconciliation**: remove managed containers with no record
//! - **Stats**: host usage plus concurrent per-sandbox queries

mod config;
mod confirm;
mod error;
mod expiry;
mod naming;
mod orchestrator;
mod os;
mod record;
mod session;
mod stats;
mod store;

#[cfg(test)]
mod test_support;

pub use config::{AccessPolicy, OrchestratorConfig, OrchestratorConfigBuilder};
pub use confirm::{ConfirmationRegistry, PendingAction, DEFAULT_CONFIRMATION_TTL};
pub use error::{CoreError, ExtractionError, Result, StoreError};
pub use expiry::{expiry_from, format_expiry, parse_duration, EXPIRY_FORMAT};
pub use naming::MANAGED_PREFIX;
pub use orchestrator::{
    Confirmation, CredentialOutcome, DeleteRequest, DeletionReport, Inspection, LifecycleState,
    Orchestrator, ProvisionRequest, Provisioned, ReconcileReport, Regenerated, StartOutcome,
    Transition,
};
pub use os::OsKind;
pub use record::{SandboxRecord, DELIMITER, FIELD_COUNT, NO_EXPIRY};
pub use session::{
    SessionExtractor, DEFAULT_SESSION_COMMAND, DEFAULT_SESSION_MARKER, DEFAULT_SESSION_TIMEOUT,
};
pub use stats::{HostStats, NodeOverview, SandboxStats};
pub use store::RecordStore;
