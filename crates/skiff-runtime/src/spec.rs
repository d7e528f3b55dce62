//! Builder pattern for ergonomic container configuration.

use crate::error::{Result, RuntimeError};

/// Everything the runtime needs to create a sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name; also the sandbox name.
    pub name: String,
    /// Image reference to run.
    pub image: String,
    /// Memory limit in GiB.
    pub memory_gib: u32,
    /// CPU limit in whole cores.
    pub cpus: u32,
    /// Run privileged with all capabilities (default: true).
    pub privileged: bool,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            image: String::new(),
            memory_gib: 2,
            cpus: 1,
            privileged: true,
        }
    }
}

impl ContainerSpec {
    /// Create a new spec builder.
    pub fn builder() -> ContainerSpecBuilder {
        ContainerSpecBuilder::default()
    }

    /// Validate the spec.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuntimeError::InvalidSpec("name is required".into()));
        }
        if self.image.trim().is_empty() {
            return Err(RuntimeError::InvalidSpec("image is required".into()));
        }
        if self.memory_gib == 0 {
            return Err(RuntimeError::InvalidSpec("memory_gib must be > 0".into()));
        }
        if self.cpus == 0 {
            return Err(RuntimeError::InvalidSpec("cpus must be > 0".into()));
        }
        Ok(())
    }

    /// Arguments for `docker run`, excluding the binary itself.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-itd".to_string()];
        if self.privileged {
            args.push("--privileged".to_string());
            args.push("--cap-add=ALL".to_string());
        }
        args.push(format!("--memory={}g", self.memory_gib));
        args.push(format!("--cpus={}", self.cpus));
        args.extend(["--name".to_string(), self.name.clone()]);
        args.push(self.image.clone());
        args
    }
}

/// Fluent builder for [`ContainerSpec`].
///
/// # Example
///
/// ```
/// use skiff_runtime::ContainerSpec;
///
/// let spec = ContainerSpec::builder()
///     .name("VPS_alice_k3J9xQ2a")
///     .image("ubuntu-22.04-with-tmate")
///     .memory_gib(4)
///     .cpus(2)
///     .build()
///     .unwrap();
/// assert!(spec.privileged);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = name.into();
        self
    }

    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.spec.image = image.into();
        self
    }

    /// Set the memory limit in GiB.
    pub fn memory_gib(mut self, gib: u32) -> Self {
        self.spec.memory_gib = gib;
        self
    }

    /// Set the CPU limit.
    pub fn cpus(mut self, cpus: u32) -> Self {
        self.spec.cpus = cpus;
        self
    }

    /// Toggle privileged mode.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.spec.privileged = privileged;
        self
    }

    /// Build the spec, validating all required fields.
    pub fn build(self) -> Result<ContainerSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec() {
        let spec = ContainerSpec::default();
        assert_eq!(spec.memory_gib, 2);
        assert_eq!(spec.cpus, 1);
        assert!(spec.privileged);
    }

    #[test]
    fn test_builder_missing_name() {
        let result = ContainerSpec::builder().image("debian-with-tmate").build();
        assert!(matches!(result, Err(RuntimeError::InvalidSpec(_))));
    }

    #[test]
    fn test_builder_missing_image() {
        let result = ContainerSpec::builder().name("VPS_x").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_zero_limits() {
        let result = ContainerSpec::builder()
            .name("VPS_x")
            .image("img")
            .memory_gib(0)
            .build();
        assert!(result.is_err());

        let result = ContainerSpec::builder()
            .name("VPS_x")
            .image("img")
            .cpus(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_run_args_privileged() {
        let spec = ContainerSpec::builder()
            .name("VPS_bob_abc")
            .image("ubuntu-22.04-with-tmate")
            .memory_gib(4)
            .cpus(2)
            .build()
            .expect("valid spec");

        assert_eq!(
            spec.run_args(),
            vec![
                "run",
                "-itd",
                "--privileged",
                "--cap-add=ALL",
                "--memory=4g",
                "--cpus=2",
                "--name",
                "VPS_bob_abc",
                "ubuntu-22.04-with-tmate",
            ]
        );
    }

    #[test]
    fn test_run_args_unprivileged() {
        let spec = ContainerSpec::builder()
            .name("n")
            .image("i")
            .privileged(false)
            .build()
            .expect("valid spec");
        let args = spec.run_args();
        assert!(!args.iter().any(|a| a == "--privileged"));
        assert!(!args.iter().any(|a| a == "--cap-add=ALL"));
    }
}
