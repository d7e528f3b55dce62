//! Orchestrator configuration and access policy.

use crate::confirm::DEFAULT_CONFIRMATION_TTL;
use crate::error::{CoreError, Result};
use crate::naming::MANAGED_PREFIX;
use crate::session::{DEFAULT_SESSION_COMMAND, DEFAULT_SESSION_MARKER, DEFAULT_SESSION_TIMEOUT};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Who may run admin-only operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    admins: HashSet<String>,
}

impl AccessPolicy {
    /// Policy granting admin rights to `ids`.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `id` is an admin.
    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.contains(id)
    }

    /// `PermissionDenied` unless `id` is an admin.
    pub fn require_admin(&self, id: &str, operation: &'static str) -> Result<()> {
        if self.is_admin(id) {
            Ok(())
        } else {
            tracing::warn!(requester = %id, operation, "Admin operation refused");
            Err(CoreError::PermissionDenied {
                requester: id.to_string(),
                operation,
            })
        }
    }

    /// Number of configured admins.
    pub fn len(&self) -> usize {
        self.admins.len()
    }

    /// True if nobody is an admin.
    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }
}

/// Configuration for the lifecycle orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Record store file.
    pub store_path: PathBuf,
    /// Multiplexer invocation run inside each sandbox.
    pub session_command: Vec<String>,
    /// Text preceding the credential in multiplexer output.
    pub session_marker: String,
    /// Deadline for one credential extraction (default: 30s).
    pub session_timeout: Duration,
    /// Prefix of runtime names this service manages; empty means all.
    pub managed_prefix: String,
    /// RAM cap in GiB (default: 100).
    pub max_ram_gib: u32,
    /// CPU cap (default: 24).
    pub max_cpus: u32,
    /// RAM when the request gives none (default: 2).
    pub default_ram_gib: u32,
    /// CPUs when the request gives none (default: 1).
    pub default_cpus: u32,
    /// Sandboxes per owner; 0 is unlimited.
    pub max_per_owner: usize,
    /// Lifetime of a pending delete confirmation (default: 60s).
    pub confirmation_ttl: Duration,
    /// Admin ids.
    pub access: AccessPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("database.txt"),
            session_command: DEFAULT_SESSION_COMMAND.iter().map(|s| s.to_string()).collect(),
            session_marker: DEFAULT_SESSION_MARKER.to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            managed_prefix: MANAGED_PREFIX.to_string(),
            max_ram_gib: 100,
            max_cpus: 24,
            default_ram_gib: 2,
            default_cpus: 1,
            max_per_owner: 0,
            confirmation_ttl: DEFAULT_CONFIRMATION_TTL,
            access: AccessPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a new config builder.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(CoreError::Config("store_path is required".into()));
        }
        if self.session_command.is_empty() {
            return Err(CoreError::Config("session_command must not be empty".into()));
        }
        if self.session_marker.is_empty() {
            return Err(CoreError::Config("session_marker must not be empty".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(CoreError::Config("session_timeout must be > 0".into()));
        }
        if self.confirmation_ttl.is_zero() {
            return Err(CoreError::Config("confirmation_ttl must be > 0".into()));
        }
        if self.max_ram_gib == 0 || self.max_cpus == 0 {
            return Err(CoreError::Config("resource caps must be > 0".into()));
        }
        if self.default_ram_gib == 0 || self.default_ram_gib > self.max_ram_gib {
            return Err(CoreError::Config(
                "default_ram_gib must be between 1 and max_ram_gib".into(),
            ));
        }
        if self.default_cpus == 0 || self.default_cpus > self.max_cpus {
            return Err(CoreError::Config(
                "default_cpus must be between 1 and max_cpus".into(),
            ));
        }
        Ok(())
    }

    /// Clamp a requested RAM size to `1..=max_ram_gib`.
    pub fn clamp_ram(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_ram_gib)
            .clamp(1, self.max_ram_gib)
    }

    /// Clamp a requested CPU count to `1..=max_cpus`.
    pub fn clamp_cpus(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_cpus)
            .clamp(1, self.max_cpus)
    }
}

/// Builder for OrchestratorConfig.
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the record store path.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = path.into();
        self
    }

    /// Set the multiplexer invocation.
    pub fn session_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.session_command = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Set the credential marker.
    pub fn session_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.session_marker = marker.into();
        self
    }

    /// Set the extraction deadline.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Set the managed name prefix.
    pub fn managed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.managed_prefix = prefix.into();
        self
    }

    /// Set the RAM cap.
    pub fn max_ram_gib(mut self, gib: u32) -> Self {
        self.config.max_ram_gib = gib;
        self
    }

    /// Set the CPU cap.
    pub fn max_cpus(mut self, cpus: u32) -> Self {
        self.config.max_cpus = cpus;
        self
    }

    /// Set the RAM default.
    pub fn default_ram_gib(mut self, gib: u32) -> Self {
        self.config.default_ram_gib = gib;
        self
    }

    /// Set the CPU default.
    pub fn default_cpus(mut self, cpus: u32) -> Self {
        self.config.default_cpus = cpus;
        self
    }

    /// Set the per-owner sandbox limit (0 = unlimited).
    pub fn max_per_owner(mut self, limit: usize) -> Self {
        self.config.max_per_owner = limit;
        self
    }

    /// Set the confirmation lifetime.
    pub fn confirmation_ttl(mut self, ttl: Duration) -> Self {
        self.config.confirmation_ttl = ttl;
        self
    }

    /// Set the admin ids.
    pub fn admins<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.access = AccessPolicy::new(ids);
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
