//! # skiff-runtime
//!
//! Container runtime adapter for Skiff sandboxes.
//! Wraps the docker CLI behind the [`ContainerRuntime`] trait and normalizes
//! its results into typed outcomes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use skiff_runtime::{ContainerRuntime, ContainerSpec, DockerCli, DockerConfig};
//!
//! # async fn example() -> skiff_runtime::Result<()> {
//! let docker = DockerCli::new(DockerConfig::default());
//!
//! let spec = ContainerSpec::builder()
//!     .name("VPS_alice_k3J9xQ2a")
//!     .image("ubuntu-22.04-with-tmate")
//!     .memory_gib(4)
//!     .cpus(2)
//!     .build()?;
//!
//! // Container is created in a running state
//! docker.create(&spec).await?;
//! println!("{}", docker.inspect_status(&spec.name).await);
//!
//! // Cleanup
//! docker.stop(&spec.name).await?;
//! docker.remove(&spec.name).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure policy
//!
//! - **Imperative** (`create`, `start`, `stop`, `remove`): failures are
//!   returned as [`RuntimeError`] with the runtime's diagnostic text and are
//!   never retried here.
//! - **Observational** (`inspect_status`, `live_stats`): never fail; they
//!   report `Unknown` / `N/A` instead.

mod docker;
mod error;
mod runtime;
mod spec;

pub use docker::{DockerCli, DockerConfig, DEFAULT_COMMAND_TIMEOUT, DEFAULT_QUERY_TIMEOUT};
pub use error::{Result, RuntimeError};
pub use runtime::{
    ContainerRuntime, ContainerStatus, LineStream, LiveStats, RuntimeHandle, UNAVAILABLE,
};
pub use spec::{ContainerSpec, ContainerSpecBuilder};
