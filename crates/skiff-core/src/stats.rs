//! Host and per-sandbox resource usage.
//!
//! Every value is a display string and degrades to [`UNAVAILABLE`] on its
//! own; one failing source never hides the others.

use crate::record::SandboxRecord;
use futures::future::join_all;
use serde::Serialize;
use skiff_runtime::{ContainerRuntime, ContainerStatus, UNAVAILABLE};
use std::path::Path;
use sysinfo::{Disks, System};

const ROOT_MOUNT: &str = "/";
const GIB: u64 = 1024 * 1024 * 1024;

/// Host memory and root filesystem usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStats {
    /// Total memory in whole GiB, e.g. `31GB`.
    pub memory_total: String,
    /// Memory in use.
    pub memory_used: String,
    /// Size of `/` in whole GiB, e.g. `457GB`.
    pub disk_total: String,
    /// Space used on `/`.
    pub disk_used: String,
}

/// Usage of one recorded sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxStats {
    /// Sandbox name.
    pub name: String,
    /// Record owner.
    pub owner: String,
    /// OS label from the record.
    pub os_label: String,
    /// Runtime status.
    pub status: ContainerStatus,
    /// `<used> / <limit>GB`.
    pub memory: String,
    /// CPU percent.
    pub cpu: String,
}

/// Host stats plus every recorded sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOverview {
    /// Host usage.
    pub host: HostStats,
    /// Per-sandbox usage, in store order.
    pub sandboxes: Vec<SandboxStats>,
}

/// Collect host memory and disk usage.
pub async fn host_stats() -> HostStats {
    match tokio::task::spawn_blocking(sample_host).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::debug!(error = %e, "Host sampling task failed");
            HostStats {
                memory_total: UNAVAILABLE.to_string(),
                memory_used: UNAVAILABLE.to_string(),
                disk_total: UNAVAILABLE.to_string(),
                disk_used: UNAVAILABLE.to_string(),
            }
        }
    }
}

/// Query status and live usage for one record.
pub async fn sandbox_stats(runtime: &dyn ContainerRuntime, record: &SandboxRecord) -> SandboxStats {
    let (status, live) = tokio::join!(
        runtime.inspect_status(&record.name),
        runtime.live_stats(&record.name)
    );

    let limit = record
        .ram_limit_gib
        .map(|gib| format!("{gib}GB"))
        .unwrap_or_else(|| UNAVAILABLE.to_string());

    SandboxStats {
        name: record.name.clone(),
        owner: record.owner.clone(),
        os_label: record.os_label.clone(),
        status,
        memory: format!("{} / {}", live.memory_used, limit),
        cpu: live.cpu_percent,
    }
}

/// Query every record concurrently, preserving order.
pub async fn sandboxes_stats(
    runtime: &dyn ContainerRuntime,
    records: &[SandboxRecord],
) -> Vec<SandboxStats> {
    join_all(records.iter().map(|r| sandbox_stats(runtime, r))).await
}

fn unavailable_pair() -> (String, String) {
    (UNAVAILABLE.to_string(), UNAVAILABLE.to_string())
}

fn sample_host() -> HostStats {
    let mut sys = System::new();
    sys.refresh_memory();
    let (memory_total, memory_used) = usage_gib(sys.total_memory(), sys.available_memory())
        .map(format_pair)
        .unwrap_or_else(unavailable_pair);

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new(ROOT_MOUNT));
    if root.is_none() {
        tracing::debug!("No disk mounted at /");
    }
    let (disk_total, disk_used) = root
        .and_then(|d| usage_gib(d.total_space(), d.available_space()))
        .map(format_pair)
        .unwrap_or_else(unavailable_pair);

    HostStats {
        memory_total,
        memory_used,
        disk_total,
        disk_used,
    }
}

fn format_pair((total, used): (u64, u64)) -> (String, String) {
    (format!("{total}GB"), format!("{used}GB"))
}

/// `(total, used)` in whole GiB from byte counts, where used is
/// `total - available`. `None` when the total is unknown (zero).
pub fn usage_gib(total_bytes: u64, available_bytes: u64) -> Option<(u64, u64)> {
    if total_bytes == 0 {
        return None;
    }
    let used = total_bytes.saturating_sub(available_bytes);
    Some((total_bytes / GIB, used / GIB))
}
