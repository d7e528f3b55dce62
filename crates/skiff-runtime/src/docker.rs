//! Docker CLI implementation of [`ContainerRuntime`].

use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerRuntime, ContainerStatus, LineStream, LiveStats, RuntimeHandle};
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Timeout for imperative commands (run/start/stop/rm).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for observational queries (inspect/stats/ps).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for [`DockerCli`].
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Path or name of the docker binary.
    pub binary: PathBuf,
    /// Upper bound for run/start/stop/rm.
    pub command_timeout: Duration,
    /// Upper bound for inspect/stats/ps.
    pub query_timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Drives containers by shelling out to the docker CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
    config: DockerConfig,
}

impl DockerCli {
    /// Create a new adapter.
    pub fn new(config: DockerConfig) -> Self {
        tracing::info!(binary = %config.binary.display(), "Creating docker runtime adapter");
        Self { config }
    }

    /// Get the adapter configuration.
    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    /// Run one docker command to completion.
    ///
    /// Returns trimmed stdout on success, otherwise a diagnostic string
    /// (stderr, exit status, spawn error or timeout).
    async fn run(&self, args: &[&str], limit: Duration) -> std::result::Result<String, String> {
        tracing::debug!(args = ?args, timeout_ms = limit.as_millis() as u64, "Running docker command");
        let start = std::time::Instant::now();

        let output = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, output).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(format!("failed to run {}: {e}", self.config.binary.display())),
            Err(_) => return Err(format!("timed out after {}ms", limit.as_millis())),
        };

        tracing::trace!(
            args = ?args,
            status = ?output.status.code(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Docker command finished"
        );

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                Err(format!("exited with status {}", output.status))
            } else {
                Err(stderr)
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn backend_name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeHandle> {
        spec.validate()?;
        tracing::info!(
            sandbox = %spec.name,
            image = %spec.image,
            memory_gib = spec.memory_gib,
            cpus = spec.cpus,
            "Creating container"
        );

        let args = spec.run_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self
            .run(&args, self.config.command_timeout)
            .await
            .map_err(|diagnostic| RuntimeError::CreationFailed {
                name: spec.name.clone(),
                diagnostic,
            })?;

        tracing::debug!(sandbox = %spec.name, container_id = %id, "Container created");
        Ok(RuntimeHandle {
            name: spec.name.clone(),
            id,
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        tracing::info!(sandbox = %name, "Starting container");
        self.run(&["start", name], self.config.command_timeout)
            .await
            .map(|_| ())
            .map_err(|diagnostic| RuntimeError::StartFailed {
                name: name.to_string(),
                diagnostic,
            })
    }

    async fn stop(&self, name: &str) -> Result<()> {
        tracing::info!(sandbox = %name, "Stopping container");
        self.run(&["stop", name], self.config.command_timeout)
            .await
            .map(|_| ())
            .map_err(|diagnostic| RuntimeError::StopFailed {
                name: name.to_string(),
                diagnostic,
            })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        tracing::info!(sandbox = %name, "Removing container");
        self.run(&["rm", name], self.config.command_timeout)
            .await
            .map(|_| ())
            .map_err(|diagnostic| RuntimeError::RemoveFailed {
                name: name.to_string(),
                diagnostic,
            })
    }

    async fn inspect_status(&self, name: &str) -> ContainerStatus {
        match self
            .run(
                &["inspect", "--format", "{{.State.Status}}", name],
                self.config.query_timeout,
            )
            .await
        {
            Ok(state) => ContainerStatus::from_state(&state),
            Err(e) => {
                tracing::debug!(sandbox = %name, error = %e, "Status query failed");
                ContainerStatus::Unknown
            }
        }
    }

    async fn live_stats(&self, name: &str) -> LiveStats {
        let result = self
            .run(
                &[
                    "stats",
                    name,
                    "--no-stream",
                    "--format",
                    "{{.MemUsage}}|{{.CPUPerc}}",
                ],
                self.config.query_timeout,
            )
            .await;

        match result {
            Ok(line) => LiveStats::parse(&line).unwrap_or_else(|| {
                tracing::debug!(sandbox = %name, output = %line, "Unparseable stats output");
                LiveStats::unavailable()
            }),
            Err(e) => {
                tracing::debug!(sandbox = %name, error = %e, "Stats query failed");
                LiveStats::unavailable()
            }
        }
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        let out = self
            .run(&["ps", "-a", "--format", "{{.Names}}"], self.config.query_timeout)
            .await
            .map_err(RuntimeError::QueryFailed)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn exec_lines(&self, name: &str, argv: &[String]) -> Result<LineStream> {
        tracing::debug!(sandbox = %name, argv = ?argv, "Launching process in container");

        let mut child = Command::new(&self.config.binary)
            .arg("exec")
            .arg(name)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RuntimeError::QueryFailed(format!("docker exec in {name}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::QueryFailed("exec stdout not captured".into()))?;
        let lines = BufReader::new(stdout).lines();

        // The child handle rides along with the stream so it is reaped only
        // when the consumer lets go of the output.
        let stream = futures::stream::unfold(Some((lines, child)), |state| async move {
            let (mut lines, child) = state?;
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some((lines, child)))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn missing_binary() -> DockerCli {
        DockerCli::new(DockerConfig {
            binary: PathBuf::from("/nonexistent/skiff-docker"),
            ..Default::default()
        })
    }

    #[test]
    fn test_config_defaults() {
        let config = DockerConfig::default();
        assert_eq!(config.binary, PathBuf::from("docker"));
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.query_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_queries_degrade_without_binary() {
        let docker = missing_binary();
        assert_eq!(docker.inspect_status("VPS_x").await, ContainerStatus::Unknown);
        assert!(docker.live_stats("VPS_x").await.is_unavailable());
    }

    #[tokio::test]
    async fn test_imperative_ops_surface_errors_without_binary() {
        let docker = missing_binary();

        let err = docker.start("VPS_x").await.unwrap_err();
        assert!(matches!(err, RuntimeError::StartFailed { ref name, .. } if name == "VPS_x"));

        let err = docker.stop("VPS_x").await.unwrap_err();
        assert!(matches!(err, RuntimeError::StopFailed { .. }));

        let err = docker.remove("VPS_x").await.unwrap_err();
        assert!(matches!(err, RuntimeError::RemoveFailed { .. }));

        let err = docker.list_names().await.unwrap_err();
        assert!(matches!(err, RuntimeError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn test_create_validates_spec_first() {
        let docker = missing_binary();
        let err = docker.create(&ContainerSpec::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_exec_lines_reads_process_output() {
        // `echo` stands in for docker and prints its arguments back.
        let docker = DockerCli::new(DockerConfig {
            binary: PathBuf::from("echo"),
            ..Default::default()
        });
        let mut stream = docker
            .exec_lines("VPS_x", &["ssh session: ssh abc@nyc1.tmate.io".to_string()])
            .await
            .expect("echo spawns");

        let line = stream.next().await.expect("one line").expect("readable");
        assert_eq!(line, "exec VPS_x ssh session: ssh abc@nyc1.tmate.io");
        assert!(stream.next().await.is_none());
    }
}
