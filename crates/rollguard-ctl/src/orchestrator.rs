//! Orchestrator: one place that owns the lease registry and hands work
//! between the three executors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rollguard_cluster::ClusterGateway;
use rollguard_core::{
    AutoRollback, Backup, BackupContents, Deployment, DeploymentOutcome, DeploymentState,
    OutcomeStatus, RollbackOutcome, RollbackRequest, RollbackTarget, RollbackType,
    RollguardConfig, StrategyKind, workload_key,
};
use rollguard_health::{GateSettings, HealthGate};
use rollguard_rollback::{Confirmer, RollbackError, RollbackExecutor};
use rollguard_rollout::{RolloutError, StrategyExecutor, StrategySettings};
use rollguard_state::{
    BackupPurpose, BackupStore, HistoryEntry, Lease, LeaseError, LeaseRegistry, StateError,
    StateStore, backup::generate_name,
};
use rollguard_trigger::{MonitorExit, TriggerMonitor};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::cluster_lease::ClusterLeases;
use crate::preflight::{Preflight, PreflightError};

/// Who the rollback-on-failure hook acts as.
const DEPLOY_HOOK: &str = "rollguard:deploy";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("invalid quota pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// One `rollguard deploy`.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub image: String,
    pub worker_image: Option<String>,
    pub strategy: StrategyKind,
    pub rollback_on_failure: bool,
    pub preflight: bool,
    /// Watch the new revision after a successful rollout.
    pub monitor: bool,
    pub monitor_duration: Option<Duration>,
}

impl DeployRequest {
    /// A request using the config's strategy and hook setting.
    pub fn new(config: &RollguardConfig, image: &str) -> Self {
        Self {
            image: image.to_string(),
            worker_image: None,
            strategy: config.rollout.strategy,
            rollback_on_failure: config.rollout.rollback_on_failure,
            preflight: true,
            monitor: false,
            monitor_duration: config.triggers.max_duration(),
        }
    }
}

/// What the trigger monitor ended with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MonitorReport {
    Completed,
    Cancelled,
    RolledBack {
        request: RollbackRequest,
        outcome: RollbackOutcome,
    },
    /// A signal fired but its rollback could not run.
    RollbackErrored {
        request: RollbackRequest,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployReport {
    pub deployment: DeploymentOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorReport>,
}

impl DeployReport {
    /// Success only when the rollout succeeded and nothing rolled it back.
    pub fn status(&self) -> OutcomeStatus {
        match (&self.deployment.status(), &self.monitor) {
            (OutcomeStatus::Success, Some(MonitorReport::RolledBack { .. })) => {
                OutcomeStatus::Partial
            }
            (_, Some(MonitorReport::RollbackErrored { .. })) => OutcomeStatus::Failed,
            (status, _) => *status,
        }
    }
}

pub struct Orchestrator {
    config: RollguardConfig,
    gateway: Arc<dyn ClusterGateway>,
    gate: HealthGate,
    leases: LeaseRegistry,
    state: StateStore,
    rollback: RollbackExecutor,
    holder: String,
}

impl Orchestrator {
    pub fn new(
        config: RollguardConfig,
        gateway: Arc<dyn ClusterGateway>,
        state: StateStore,
        backup_dir: impl Into<PathBuf>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let gate = HealthGate::new(gateway.clone(), GateSettings::from_config(&config));
        let backups = BackupStore::new(backup_dir, state.clone());
        let rollback =
            RollbackExecutor::from_config(&config, gateway.clone(), gate.clone(), backups, confirmer);
        let leases = if config.rollout.cluster_lease {
            LeaseRegistry::with_backend(
                Arc::new(ClusterLeases::new(gateway.clone())),
                config.rollout.lease_ttl(),
            )
        } else {
            LeaseRegistry::new()
        };
        Self {
            config,
            gateway,
            gate,
            leases,
            state,
            rollback,
            holder: format!("rollguard-{}", std::process::id()),
        }
    }

    /// Share a lease registry with other orchestrators in this process.
    pub fn with_leases(mut self, leases: LeaseRegistry) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_holder(mut self, holder: &str) -> Self {
        self.holder = holder.to_string();
        self
    }

    pub fn config(&self) -> &RollguardConfig {
        &self.config
    }

    pub fn backups(&self) -> &BackupStore {
        self.rollback.backups()
    }

    fn lease_key(&self) -> String {
        workload_key(&self.config.namespace, &self.config.workload.app)
    }

    async fn acquire(&self) -> Result<Lease, LeaseError> {
        let rollout = &self.config.rollout;
        self.leases
            .acquire(
                &self.lease_key(),
                &self.holder,
                rollout.lease_attempts,
                rollout.lease_backoff(),
            )
            .await
    }

    /// Roll out `request.image`, reverting on failure and optionally
    /// watching the result.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        shutdown: watch::Receiver<bool>,
    ) -> OrchestratorResult<DeployReport> {
        if request.preflight {
            let mut images = vec![request.image.clone()];
            images.extend(request.worker_image.clone());
            Preflight::new(
                self.gateway.clone(),
                self.backups().clone(),
                &self.config.namespace,
                &self.config.app_selector(),
            )
            .run(&images)
            .await?;
        }

        let started = Instant::now();
        let lease = self.acquire().await?;
        let mut deployment = Deployment::new(
            &self.config.namespace,
            &self.config.workload.app,
            request.strategy,
            &request.image,
            request.worker_image.as_deref(),
        );
        let baseline = match self.take_baseline(&deployment).await {
            Ok(backup) => backup,
            Err(e) => {
                lease.release().await;
                return Err(e);
            }
        };
        let executor = StrategyExecutor::new(
            self.gateway.clone(),
            self.gate.clone(),
            StrategySettings::from_config(&self.config),
        );

        let failure = match executor.run(&mut deployment, &lease, shutdown.clone()).await {
            Ok(()) => None,
            Err(RolloutError::Lease(e)) => return Err(e.into()),
            Err(RolloutError::Phase(failure)) => Some(failure),
        };

        let mut outcome = DeploymentOutcome::from_deployment(&deployment, Duration::ZERO);
        outcome.baseline_backup = Some(baseline.id);
        if let Some(failure) = failure {
            outcome.rollback = self
                .rollback_failed(&deployment, &failure.to_string(), request, &lease)
                .await;
            if let AutoRollback::Attempted { outcome: rollback } = &outcome.rollback
                && rollback.status == OutcomeStatus::Success
            {
                outcome.final_state = DeploymentState::RolledBack;
            }
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        let recorded = self.state.record_deployment(&outcome);
        lease.release().await;
        recorded?;

        let monitor = if request.monitor && outcome.final_state == DeploymentState::Succeeded {
            Some(self.monitor(request.monitor_duration, shutdown).await?)
        } else {
            None
        };
        Ok(DeployReport {
            deployment: outcome,
            monitor,
        })
    }

    /// Snapshot every managed component before the rollout touches them.
    /// `previous` returns here.
    async fn take_baseline(&self, deployment: &Deployment) -> OrchestratorResult<Backup> {
        let mut metadata = BackupPurpose::PreDeploy.metadata();
        metadata.insert("deployment".to_string(), deployment.id.clone());
        metadata.insert("image".to_string(), deployment.target_image.clone());
        metadata.insert("initiated_by".to_string(), self.holder.clone());
        let backup = self
            .rollback
            .create_backup(&generate_name("pre-deploy"), metadata)
            .await?;
        info!(deployment = %deployment.id, backup = %backup.id, "baseline backup taken");
        Ok(backup)
    }

    /// The rollback-on-failure hook. Runs under the deployment's lease.
    async fn rollback_failed(
        &self,
        deployment: &Deployment,
        reason: &str,
        request: &DeployRequest,
        lease: &Lease,
    ) -> AutoRollback {
        if !request.rollback_on_failure {
            info!(deployment = %deployment.id, "rollback on failure disabled");
            return AutoRollback::Disabled;
        }
        if !deployment.live_mutated {
            info!(deployment = %deployment.id, "live workload untouched, no rollback required");
            return AutoRollback::NotRequired;
        }

        let rollback = RollbackRequest::new(
            RollbackType::Application,
            RollbackTarget::Previous,
            &format!("deployment {} failed: {reason}", deployment.id),
            DEPLOY_HOOK,
            true,
        );
        match self.rollback.run(&rollback, lease).await {
            Ok(outcome) => {
                if let Err(e) = self.state.record_rollback(&outcome) {
                    warn!(rollback = %outcome.id, error = %e, "could not record rollback");
                }
                AutoRollback::Attempted {
                    outcome: Box::new(outcome),
                }
            }
            Err(e) => {
                error!(deployment = %deployment.id, error = %e, "rollback on failure could not run");
                AutoRollback::Errored {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Watch the live revision and run any rollback a signal requests.
    ///
    /// The monitor itself holds no lease; the rollback takes it.
    pub async fn monitor(
        &self,
        max_duration: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> OrchestratorResult<MonitorReport> {
        let mut monitor =
            TriggerMonitor::from_config(&self.config, self.gateway.clone(), self.gate.clone())?
                .with_max_duration(max_duration);
        match monitor.run(shutdown).await {
            MonitorExit::Completed => Ok(MonitorReport::Completed),
            MonitorExit::Cancelled => Ok(MonitorReport::Cancelled),
            MonitorExit::Triggered(request) => match self.rollback(&request).await {
                Ok(outcome) => Ok(MonitorReport::RolledBack { request, outcome }),
                Err(e) => {
                    error!(rollback = %request.id, error = %e, "triggered rollback could not run");
                    Ok(MonitorReport::RollbackErrored {
                        request,
                        error: e.to_string(),
                    })
                }
            },
        }
    }

    /// Run one rollback under the workload lease and record it. A run
    /// that cannot start is recorded as an aborted outcome.
    pub async fn rollback(&self, request: &RollbackRequest) -> OrchestratorResult<RollbackOutcome> {
        let started = Instant::now();
        let result = match self.acquire().await {
            Ok(lease) => {
                let result = self.rollback.run(request, &lease).await;
                lease.release().await;
                result.map_err(OrchestratorError::from)
            }
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(outcome) => {
                self.state.record_rollback(&outcome)?;
                Ok(outcome)
            }
            Err(e) => {
                let aborted = RollbackOutcome::aborted(request, &e.to_string(), started.elapsed());
                if let Err(record) = self.state.record_rollback(&aborted) {
                    warn!(
                        rollback = %request.id,
                        error = %record,
                        "could not record aborted rollback"
                    );
                }
                Err(e)
            }
        }
    }

    /// Snapshot every managed component. Generates a name when none is given.
    pub async fn create_backup(&self, name: Option<&str>) -> OrchestratorResult<Backup> {
        let name = name.map_or_else(|| generate_name("manual"), str::to_string);
        let mut metadata = BackupPurpose::Manual.metadata();
        metadata.insert("initiated_by".to_string(), self.holder.clone());
        Ok(self.rollback.create_backup(&name, metadata).await?)
    }

    pub fn list_backups(&self) -> OrchestratorResult<Vec<Backup>> {
        Ok(self.backups().list()?)
    }

    pub fn show_backup(&self, name: &str) -> OrchestratorResult<(Backup, BackupContents)> {
        Ok(self.backups().load(name)?)
    }

    pub fn history(&self, limit: usize) -> OrchestratorResult<Vec<HistoryEntry>> {
        Ok(self.state.history(limit)?)
    }
}
