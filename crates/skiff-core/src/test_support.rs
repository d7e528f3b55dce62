//! In-memory runtime for unit tests.

use async_trait::async_trait;
use futures::StreamExt;
use skiff_runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, LineStream, LiveStats, Result,
    RuntimeError, RuntimeHandle,
};
use std::collections::HashSet;
use std::sync::Mutex;

pub const FAKE_CREDENTIAL: &str = "ssh fake@nyc1.tmate.io";

/// What `exec_lines` does.
#[derive(Debug, Clone)]
pub enum Session {
    /// Emit these lines, then end.
    Lines(Vec<String>),
    /// Emit nothing and never end.
    Hang,
    /// Fail to launch.
    LaunchFails,
}

impl Default for Session {
    fn default() -> Self {
        Self::Lines(vec![
            "To connect to the session locally, run: tmate -S /tmp/tmate.sock attach".into(),
            format!("ssh session: {FAKE_CREDENTIAL}"),
            "web session: https://tmate.io/t/fake".into(),
        ])
    }
}

/// Records every call as `"op:name"`; individual operations can be made to fail.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    session: Mutex<Session>,
    listing: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` (`create`, `start`, `stop`, `remove`, `inspect`, `stats`, `list`) fail.
    pub fn failing(self, op: &'static str) -> Self {
        self.failing.lock().unwrap().insert(op);
        self
    }

    pub fn with_session(self, session: Session) -> Self {
        *self.session.lock().unwrap() = session;
        self
    }

    pub fn with_listing(self, names: &[&str]) -> Self {
        *self.listing.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn set_session(&self, session: Session) {
        *self.session.lock().unwrap() = session;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation names only, in order.
    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, op: &str, name: &str) {
        self.calls.lock().unwrap().push(format!("{op}:{name}"));
    }

    fn fails(&self, op: &str) -> bool {
        self.failing.lock().unwrap().contains(op)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeHandle> {
        self.record("create", &spec.name);
        if self.fails("create") {
            return Err(RuntimeError::CreationFailed {
                name: spec.name.clone(),
                diagnostic: "injected".into(),
            });
        }
        Ok(RuntimeHandle {
            name: spec.name.clone(),
            id: format!("fake-{}", spec.name),
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record("start", name);
        if self.fails("start") {
            return Err(RuntimeError::StartFailed {
                name: name.into(),
                diagnostic: "injected".into(),
            });
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.record("stop", name);
        if self.fails("stop") {
            return Err(RuntimeError::StopFailed {
                name: name.into(),
                diagnostic: "injected".into(),
            });
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.record("remove", name);
        if self.fails("remove") {
            return Err(RuntimeError::RemoveFailed {
                name: name.into(),
                diagnostic: "injected".into(),
            });
        }
        Ok(())
    }

    async fn inspect_status(&self, name: &str) -> ContainerStatus {
        self.record("inspect", name);
        if self.fails("inspect") {
            ContainerStatus::Unknown
        } else {
            ContainerStatus::Running
        }
    }

    async fn live_stats(&self, name: &str) -> LiveStats {
        self.record("stats", name);
        if self.fails("stats") {
            LiveStats::unavailable()
        } else {
            LiveStats {
                memory_used: "45.2MiB".into(),
                cpu_percent: "0.15%".into(),
            }
        }
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        self.record("list", "*");
        if self.fails("list") {
            return Err(RuntimeError::QueryFailed("injected".into()));
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn exec_lines(&self, name: &str, _argv: &[String]) -> Result<LineStream> {
        self.record("exec", name);
        let session = self.session.lock().unwrap().clone();
        match session {
            Session::Lines(lines) => Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed()),
            Session::Hang => Ok(futures::stream::pending().boxed()),
            Session::LaunchFails => Err(RuntimeError::QueryFailed("no such container".into())),
        }
    }
}
