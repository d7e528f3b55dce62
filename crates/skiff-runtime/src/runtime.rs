//! The container runtime seam.
//!
//! [`ContainerRuntime`] is what the orchestrator talks to. Imperative
//! operations (create/start/stop/remove) return typed errors; observational
//! ones (status, stats) never fail and degrade to placeholder values instead.

use crate::error::Result;
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;

/// Lazy, finite, non-restartable stream of output lines from a process
/// running inside a sandbox.
pub type LineStream = BoxStream<'static, std::io::Result<String>>;

/// Placeholder used when a stats value could not be obtained.
pub const UNAVAILABLE: &str = "N/A";

/// Handle returned by a successful `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    /// Container name.
    pub name: String,
    /// Runtime-assigned container id.
    pub id: String,
}

/// Observed container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Container is running.
    Running,
    /// Container exists but is not running.
    Stopped,
    /// Status could not be determined.
    Unknown,
}

impl ContainerStatus {
    /// Map a runtime state string (`{{.State.Status}}`) to a status.
    pub fn from_state(state: &str) -> Self {
        match state.trim() {
            "running" | "restarting" => Self::Running,
            "created" | "exited" | "paused" | "dead" | "removing" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Point-in-time resource usage of one container, as display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    /// Memory in use, e.g. `45.2MiB`.
    pub memory_used: String,
    /// CPU usage, e.g. `0.15%`.
    pub cpu_percent: String,
}

impl LiveStats {
    /// Placeholder returned when the stats query fails.
    pub fn unavailable() -> Self {
        Self {
            memory_used: UNAVAILABLE.to_string(),
            cpu_percent: UNAVAILABLE.to_string(),
        }
    }

    /// True if this is the placeholder value.
    pub fn is_unavailable(&self) -> bool {
        self.memory_used == UNAVAILABLE && self.cpu_percent == UNAVAILABLE
    }

    /// Parse a `{{.MemUsage}}|{{.CPUPerc}}` line, e.g. `45.2MiB / 2GiB|0.15%`.
    ///
    /// Only the used half of the memory column is kept; the limit shown to
    /// users comes from the recorded value instead.
    pub fn parse(line: &str) -> Option<Self> {
        let (mem, cpu) = line.trim().split_once('|')?;
        let used = mem.split(" / ").next().unwrap_or(mem).trim();
        let cpu = cpu.trim();
        if used.is_empty() || cpu.is_empty() {
            return None;
        }
        Some(Self {
            memory_used: used.to_string(),
            cpu_percent: cpu.to_string(),
        })
    }
}

/// Operations the orchestrator needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable backend name.
    fn backend_name(&self) -> &'static str;

    /// Create and run a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeHandle>;

    /// Start a stopped container.
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop a running container.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Remove a container.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Current status; `Unknown` on any failure.
    async fn inspect_status(&self, name: &str) -> ContainerStatus;

    /// Live usage; [`LiveStats::unavailable`] on any failure.
    async fn live_stats(&self, name: &str) -> LiveStats;

    /// Names of every container the runtime knows about, running or not.
    async fn list_names(&self) -> Result<Vec<String>>;

    /// Launch `argv` inside the container and stream its stdout by line.
    ///
    /// Dropping the stream does not kill the process.
    async fn exec_lines(&self, name: &str, argv: &[String]) -> Result<LineStream>;
}
