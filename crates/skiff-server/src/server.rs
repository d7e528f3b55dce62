//! SkiffServer - dispatches API commands to the orchestrator.

use crate::config::ServerConfig;
use crate::types::{ApiResult, Command, ConfirmParams, TargetParams};
use skiff_core::{CoreError, Orchestrator, OsKind, ProvisionRequest, RecordStore};
use skiff_runtime::DockerCli;
use std::sync::Arc;
use uuid::Uuid;

/// Command server state, cheap to clone into request handlers.
#[derive(Clone)]
pub struct SkiffServer {
    orchestrator: Arc<Orchestrator>,
}

impl SkiffServer {
    /// Build the Docker runtime, record store and orchestrator from `config`.
    pub fn new(config: &ServerConfig) -> Result<Self, CoreError> {
        let orchestrator_config = config.orchestrator_config()?;
        let store = RecordStore::new(&orchestrator_config.store_path);
        let runtime = Arc::new(DockerCli::new(config.docker_config()));
        let orchestrator = Orchestrator::new(orchestrator_config, runtime, store)?;
        Ok(Self::with_orchestrator(Arc::new(orchestrator)))
    }

    /// Wrap an existing orchestrator.
    pub fn with_orchestrator(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Get a reference to the orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run one command and wrap the outcome.
    pub async fn dispatch(&self, command: Command) -> ApiResult {
        let operation = command.operation();
        let requester = command.requester().to_string();
        tracing::info!(operation, requester = %requester, "Command received");

        match self.execute(command).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    operation,
                    requester = %requester,
                    kind = e.kind(),
                    error = %e,
                    "Command failed"
                );
                ApiResult::from(&e)
            }
        }
    }

    /// Redeem a confirmation token.
    pub async fn confirm(&self, token: &str, params: ConfirmParams) -> ApiResult {
        let result = match Uuid::parse_str(token) {
            Ok(token) => {
                self.orchestrator
                    .confirm(token, &params.requester, params.approved)
                    .await
            }
            Err(_) => Err(CoreError::UnknownConfirmation),
        };

        match result {
            Ok(outcome) => ApiResult::success(&outcome),
            Err(e) => {
                tracing::warn!(requester = %params.requester, kind = e.kind(), error = %e, "Confirmation failed");
                ApiResult::from(&e)
            }
        }
    }

    async fn execute(&self, command: Command) -> Result<ApiResult, CoreError> {
        let orchestrator = &self.orchestrator;
        let result = match command {
            Command::Provision(p) => {
                let os = p
                    .os
                    .as_deref()
                    .map(str::parse::<OsKind>)
                    .transpose()?
                    .unwrap_or_default();
                let owner = p.owner.unwrap_or_else(|| p.requester.clone());
                let request = ProvisionRequest {
                    name: p.name,
                    os,
                    ram_gib: p.ram_gib,
                    cpus: p.cpus,
                    expiry: p.expiry,
                    requester_name: p.requester_name,
                    ..ProvisionRequest::new(p.requester, owner)
                };
                ApiResult::success(&orchestrator.provision(request).await?)
            }
            Command::Start(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(&orchestrator.start(owner, t.name.as_deref()).await?)
            }
            Command::Stop(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(&orchestrator.stop(owner, t.name.as_deref()).await?)
            }
            Command::Restart(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(&orchestrator.restart(owner, t.name.as_deref()).await?)
            }
            Command::RegenerateCredential(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(
                    &orchestrator
                        .regenerate_credential(owner, t.name.as_deref())
                        .await?,
                )
            }
            Command::Inspect(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(&orchestrator.inspect(owner, t.name.as_deref()).await?)
            }
            Command::List(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(&orchestrator.list_owned(owner).await?)
            }
            Command::ListAll(r) => ApiResult::success(&orchestrator.list_all(&r.requester).await?),
            Command::RequestDelete(t) => {
                let owner = self.authorize(&t)?;
                ApiResult::success(
                    &orchestrator
                        .request_delete(&t.requester, owner, t.name.as_deref())
                        .await?,
                )
            }
            Command::RequestDeleteAll(r) => {
                ApiResult::success(&orchestrator.request_delete_all(&r.requester).await?)
            }
            Command::Reconcile(r) => ApiResult::success(&orchestrator.reconcile(&r.requester).await?),
            Command::NodeStats(r) => {
                ApiResult::success(&orchestrator.node_overview(&r.requester).await?)
            }
        };
        Ok(result)
    }

    /// Owner the command acts on. Only admins may act on someone else's sandboxes.
    fn authorize<'a>(&self, target: &'a TargetParams) -> Result<&'a str, CoreError> {
        let owner = target.owner();
        if owner != target.requester && !self.orchestrator.config().access.is_admin(&target.requester) {
            return Err(CoreError::PermissionDenied {
                requester: target.requester.clone(),
                operation: "act_for_other_owner",
            });
        }
        Ok(owner)
    }
}
