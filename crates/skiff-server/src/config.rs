//! Configuration for the command server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use skiff_core::{CoreError, OrchestratorConfig};
use skiff_runtime::DockerConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the Skiff server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Record store file.
    pub store_path: PathBuf,

    /// Docker binary.
    pub docker_binary: PathBuf,

    /// Deadline for one credential extraction (default: 30s).
    pub session_timeout: Duration,

    /// User ids allowed to run admin operations.
    pub admins: Vec<String>,

    /// RAM cap in GiB (default: 100).
    pub max_ram_gib: u32,

    /// CPU cap (default: 24).
    pub max_cpus: u32,

    /// Sandboxes per owner (default: 0 = unlimited).
    pub max_per_owner: usize,

    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Remove orphaned containers once at startup (default: false).
    pub reconcile_on_start: bool,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no admin ids configured")]
    NoAdmins,

    #[error("store directory not found: {0}")]
    MissingStoreDir(PathBuf),

    #[error("docker binary not found: {0}")]
    MissingDocker(PathBuf),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("database.txt"),
            docker_binary: PathBuf::from("docker"),
            session_timeout: Duration::from_secs(30),
            admins: Vec::new(),
            max_ram_gib: 100,
            max_cpus: 24,
            max_per_owner: 0,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            reconcile_on_start: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SKIFF_STORE` | `database.txt` |
    /// | `SKIFF_DOCKER` | `docker` |
    /// | `SKIFF_SESSION_TIMEOUT_SECS` | `30` |
    /// | `SKIFF_ADMINS` | empty (comma-separated ids) |
    /// | `SKIFF_MAX_RAM_GIB` | `100` |
    /// | `SKIFF_MAX_CPUS` | `24` |
    /// | `SKIFF_MAX_PER_OWNER` | `0` (unlimited) |
    /// | `SKIFF_HTTP_HOST` | `0.0.0.0` |
    /// | `SKIFF_HTTP_PORT` | `8080` |
    /// | `SKIFF_RECONCILE_ON_START` | `false` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let http_host: IpAddr =
            parse_var(&lookup, "SKIFF_HTTP_HOST").unwrap_or(default.http_addr.ip());
        let http_port: u16 =
            parse_var(&lookup, "SKIFF_HTTP_PORT").unwrap_or(default.http_addr.port());

        Self {
            store_path: lookup("SKIFF_STORE")
                .map(PathBuf::from)
                .unwrap_or(default.store_path),
            docker_binary: lookup("SKIFF_DOCKER")
                .map(PathBuf::from)
                .unwrap_or(default.docker_binary),
            session_timeout: parse_var(&lookup, "SKIFF_SESSION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.session_timeout),
            admins: lookup("SKIFF_ADMINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(default.admins),
            max_ram_gib: parse_var(&lookup, "SKIFF_MAX_RAM_GIB").unwrap_or(default.max_ram_gib),
            max_cpus: parse_var(&lookup, "SKIFF_MAX_CPUS").unwrap_or(default.max_cpus),
            max_per_owner: parse_var(&lookup, "SKIFF_MAX_PER_OWNER")
                .unwrap_or(default.max_per_owner),
            http_addr: SocketAddr::new(http_host, http_port),
            reconcile_on_start: lookup("SKIFF_RECONCILE_ON_START")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default.reconcile_on_start),
        }
    }

    /// Orchestrator settings derived from this configuration.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, CoreError> {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig::builder()
            .store_path(&self.store_path)
            .session_timeout(self.session_timeout)
            .max_ram_gib(self.max_ram_gib)
            .max_cpus(self.max_cpus)
            .default_ram_gib(defaults.default_ram_gib.min(self.max_ram_gib))
            .default_cpus(defaults.default_cpus.min(self.max_cpus))
            .max_per_owner(self.max_per_owner)
            .admins(self.admins.iter().cloned())
            .build()
    }

    /// Docker CLI settings derived from this configuration.
    pub fn docker_config(&self) -> DockerConfig {
        DockerConfig {
            binary: self.docker_binary.clone(),
            ..DockerConfig::default()
        }
    }

    /// Validate the configuration against the host.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admins.is_empty() {
            return Err(ConfigError::NoAdmins);
        }

        if let Some(parent) = self.store_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::MissingStoreDir(parent.to_path_buf()));
            }
        }

        // Bare names are resolved through PATH at spawn time.
        if self.docker_binary.components().count() > 1 && !self.docker_binary.exists() {
            return Err(ConfigError::MissingDocker(self.docker_binary.clone()));
        }

        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Configuration problem");
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
