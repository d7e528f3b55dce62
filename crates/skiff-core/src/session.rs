//! Credential extraction from the session multiplexer.
//!
//! The multiplexer (tmate by default) runs in the foreground inside the
//! sandbox and eventually prints a line such as
//!
//! ```text
//! ssh session: ssh AbCdEf@nyc1.tmate.io
//! ```
//!
//! [`SessionExtractor`] scans its output for that marker under a deadline.
//! The multiplexer is never killed: once a credential is found the rest of
//! its output is drained in the background so the session stays up, and on
//! timeout the process is simply abandoned.

use crate::error::ExtractionError;
use futures::StreamExt;
use skiff_runtime::{ContainerRuntime, LineStream};
use std::time::Duration;
use tokio::time::Instant;

/// Default multiplexer invocation.
pub const DEFAULT_SESSION_COMMAND: [&str; 2] = ["tmate", "-F"];

/// Default credential marker.
pub const DEFAULT_SESSION_MARKER: &str = "ssh session:";

/// Default deadline for one extraction.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Scans multiplexer output for a credential line.
#[derive(Debug, Clone)]
pub struct SessionExtractor {
    command: Vec<String>,
    marker: String,
    timeout: Duration,
}

impl Default for SessionExtractor {
    fn default() -> Self {
        Self {
            command: DEFAULT_SESSION_COMMAND.iter().map(|s| s.to_string()).collect(),
            marker: DEFAULT_SESSION_MARKER.to_string(),
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl SessionExtractor {
    /// Create an extractor.
    pub fn new(command: Vec<String>, marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command,
            marker: marker.into(),
            timeout,
        }
    }

    /// Deadline applied to each extraction.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Launch the multiplexer in `name` and return the first credential it prints.
    pub async fn extract(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
    ) -> Result<String, ExtractionError> {
        let started = Instant::now();
        tracing::debug!(sandbox = %name, command = ?self.command, "Launching session multiplexer");

        let result = match tokio::time::timeout(self.timeout, self.scan(runtime, name)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::TimedOut(self.timeout)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(sandbox = %name, elapsed_ms, "Session credential captured"),
            Err(e) => tracing::warn!(sandbox = %name, elapsed_ms, error = %e, "Session extraction failed"),
        }
        result
    }

    async fn scan(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
    ) -> Result<String, ExtractionError> {
        let mut lines = runtime
            .exec_lines(name, &self.command)
            .await
            .map_err(|e| ExtractionError::Launch(e.to_string()))?;

        let credential = loop {
            let line = match lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::debug!(sandbox = %name, error = %e, "Session output errored");
                    return Err(ExtractionError::StreamClosed);
                }
                None => return Err(ExtractionError::StreamClosed),
            };
            tracing::trace!(sandbox = %name, line = %line, "Session output");

            if let Some(credential) = match_marker(&line, &self.marker) {
                break credential.to_string();
            }
        };

        drain(name, lines);
        Ok(credential)
    }
}

/// Trimmed text after `marker`, if the line carries a non-empty one.
pub fn match_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let idx = line.find(marker)?;
    let rest = line[idx + marker.len()..].trim();
    (!rest.is_empty()).then_some(rest)
}

// Keep a reader on the multiplexer's stdout for as long as it runs.
fn drain(name: &str, mut lines: LineStream) {
    let name = name.to_string();
    tokio::spawn(async move {
        while let Some(Ok(line)) = lines.next().await {
            tracing::trace!(sandbox = %name, line = %line, "Session output (drained)");
        }
        tracing::debug!(sandbox = %name, "Session output closed");
    });
}
