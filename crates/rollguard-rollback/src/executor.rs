//! Rollback executor: entry point for one rollback run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rollguard_cluster::ClusterGateway;
use rollguard_core::{
    Backup, BackupContents, Component, ComponentResult, ComponentStatus, RollbackOutcome,
    RollbackRequest, RollbackTarget, RollbackType, RollguardConfig, workload_key,
};
use rollguard_health::HealthGate;
use rollguard_state::{BackupPurpose, BackupStore, Lease, StateError, backup::generate_name};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::application::ApplicationReverter;
use crate::confirm::Confirmer;
use crate::database::DatabaseReverter;
use crate::error::{RollbackError, RollbackResult};
use crate::objects::ObjectReverter;
use crate::reverter::{ComponentReverter, RevertContext, RevertTo};

/// Knobs for one executor, usually taken from `rollguard.toml`.
#[derive(Debug, Clone)]
pub struct RollbackPolicy {
    pub namespace: String,
    pub app: String,
    pub production: bool,
    pub skip_backup: bool,
    pub require_confirmation: bool,
    pub retry_budget: u32,
    pub retry_backoff: Duration,
    pub gate_attempts: u32,
    pub gate_interval: Duration,
}

impl RollbackPolicy {
    pub fn from_config(config: &RollguardConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            app: config.workload.app.clone(),
            production: config.is_production(),
            skip_backup: config.rollback.skip_backup,
            require_confirmation: config.rollback.require_confirmation,
            retry_budget: config.rollout.retry_budget,
            retry_backoff: config.rollout.retry_backoff(),
            gate_attempts: config.health.max_attempts,
            gate_interval: config.health.interval(),
        }
    }

    /// The workload lease a rollback must hold.
    pub fn lease_key(&self) -> String {
        workload_key(&self.namespace, &self.app)
    }
}

/// Where the components of one run are going.
enum Source {
    Previous { baseline: Option<(String, BackupContents)> },
    Revision(u32),
    Backup(String, BackupContents),
}

pub struct RollbackExecutor {
    gateway: Arc<dyn ClusterGateway>,
    gate: HealthGate,
    backups: BackupStore,
    confirmer: Arc<dyn Confirmer>,
    policy: RollbackPolicy,
    /// One per managed component.
    reverters: Vec<Box<dyn ComponentReverter>>,
}

impl RollbackExecutor {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        gate: HealthGate,
        backups: BackupStore,
        confirmer: Arc<dyn Confirmer>,
        policy: RollbackPolicy,
    ) -> Self {
        Self {
            gateway,
            gate,
            backups,
            confirmer,
            policy,
            reverters: Vec::new(),
        }
    }

    pub fn with_reverter(mut self, reverter: Box<dyn ComponentReverter>) -> Self {
        self.reverters.retain(|r| r.component() != reverter.component());
        self.reverters.push(reverter);
        self
    }

    /// An executor managing every component the config describes.
    ///
    /// The database is only managed when `database.enabled` is set.
    pub fn from_config(
        config: &RollguardConfig,
        gateway: Arc<dyn ClusterGateway>,
        gate: HealthGate,
        backups: BackupStore,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let selector = config.app_selector();
        let scopes = &config.components;
        let mut executor = Self::new(
            gateway,
            gate,
            backups,
            confirmer,
            RollbackPolicy::from_config(config),
        )
        .with_reverter(Box::new(ObjectReverter::new(
            Component::Monitoring,
            scopes.monitoring.clone(),
        )))
        .with_reverter(Box::new(
            ApplicationReverter::new(
                &config.workload.app,
                config.workload.worker.as_deref(),
                &selector,
                scopes.application.clone(),
            )
            .with_service(config.blue_green.service.as_deref().unwrap_or(&config.workload.app)),
        ))
        .with_reverter(Box::new(ObjectReverter::new(
            Component::Infrastructure,
            scopes.infrastructure.clone(),
        )));
        if config.database.enabled {
            executor =
                executor.with_reverter(Box::new(DatabaseReverter::new(&config.database, &selector)));
        }
        executor
    }

    pub fn policy(&self) -> &RollbackPolicy {
        &self.policy
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    fn context(&self) -> RevertContext<'_> {
        RevertContext {
            gateway: self.gateway.as_ref(),
            gate: &self.gate,
            namespace: &self.policy.namespace,
            retry_budget: self.policy.retry_budget,
            retry_backoff: self.policy.retry_backoff,
            gate_attempts: self.policy.gate_attempts,
            gate_interval: self.policy.gate_interval,
        }
    }

    fn reverter(&self, component: Component) -> Option<&dyn ComponentReverter> {
        self.reverters
            .iter()
            .find(|r| r.component() == component)
            .map(|r| &**r)
    }

    /// Snapshot every managed component into a new backup.
    pub async fn create_backup(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> RollbackResult<Backup> {
        if self.backups.exists(name)? {
            return Err(StateError::BackupExists(name.to_string()).into());
        }
        let ctx = self.context();
        let mut contents = BackupContents {
            namespace: self.policy.namespace.clone(),
            ..Default::default()
        };
        for component in Component::ROLLBACK_ORDER {
            if let Some(reverter) = self.reverter(component) {
                reverter
                    .snapshot(&ctx, &mut contents)
                    .await
                    .map_err(|e| RollbackError::Snapshot {
                        component,
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(self.backups.create(name, &contents, metadata)?)
    }

    /// Validate the request and work out which components run.
    fn plan(&self, request: &RollbackRequest) -> RollbackResult<Vec<&dyn ComponentReverter>> {
        let mut plan = Vec::new();
        for component in request.rollback_type.components() {
            match self.reverter(component) {
                Some(reverter) => plan.push(reverter),
                None if request.rollback_type == RollbackType::Full => {
                    info!(%component, "component not managed, skipped");
                }
                None => {
                    return Err(RollbackError::InvalidTarget(format!(
                        "{component} rollback is not enabled"
                    )));
                }
            }
        }
        if let RollbackTarget::Revision(n) = request.target
            && let Some(r) = plan.iter().find(|r| !r.accepts_revision())
        {
            return Err(RollbackError::InvalidTarget(format!(
                "revision:{n} does not apply to {}; use previous or backup:NAME",
                r.component()
            )));
        }
        Ok(plan)
    }

    /// Load whatever the target needs before anything is written.
    fn resolve(&self, request: &RollbackRequest) -> RollbackResult<Source> {
        match &request.target {
            RollbackTarget::Revision(n) => Ok(Source::Revision(*n)),
            RollbackTarget::Backup(name) => {
                let (_, contents) = self.backups.load(name).map_err(|e| match e {
                    StateError::NotFound(_) => RollbackError::BackupNotFound(name.clone()),
                    other => RollbackError::State(other),
                })?;
                if contents.namespace != self.policy.namespace {
                    return Err(RollbackError::InvalidTarget(format!(
                        "backup {name} is for namespace {:?}, not {:?}",
                        contents.namespace, self.policy.namespace
                    )));
                }
                Ok(Source::Backup(name.clone(), contents))
            }
            RollbackTarget::Previous => {
                // The state before the latest rollout, so repeating a
                // rollback lands on the same place.
                let baseline = match self.backups.baseline()? {
                    Some(backup) => {
                        let (_, contents) = self.backups.load(&backup.id)?;
                        Some((backup.id, contents))
                    }
                    None => None,
                };
                Ok(Source::Previous { baseline })
            }
        }
    }

    /// Revert the requested components under `lease`.
    ///
    /// Errors mean nothing was reverted. Once components start running,
    /// every failure is recorded in the outcome instead.
    pub async fn run(
        &self,
        request: &RollbackRequest,
        lease: &Lease,
    ) -> RollbackResult<RollbackOutcome> {
        lease.covers(&self.policy.lease_key())?;
        let started = Instant::now();
        info!(
            rollback = %request.id,
            rollback_type = %request.rollback_type,
            target = %request.target,
            initiated_by = %request.initiated_by,
            reason = %request.reason,
            "rollback started"
        );

        let plan = self.plan(request)?;
        let source = self.resolve(request)?;

        let pre_rollback_backup = if self.policy.skip_backup {
            warn!(rollback = %request.id, "pre-rollback backup skipped");
            None
        } else {
            let mut metadata = BackupPurpose::PreRollback.metadata();
            metadata.insert("rollback".to_string(), request.id.clone());
            metadata.insert("reason".to_string(), request.reason.clone());
            metadata.insert("initiated_by".to_string(), request.initiated_by.clone());
            let backup = self
                .create_backup(&generate_name("pre-rollback"), metadata)
                .await?;
            Some(backup.id)
        };

        if !request.auto_approved && self.policy.production && self.policy.require_confirmation {
            info!(rollback = %request.id, "waiting for operator confirmation");
            if !self.confirmer.confirm(request).await {
                warn!(rollback = %request.id, "rollback declined by operator");
                return Err(RollbackError::NotConfirmed);
            }
        }

        let ctx = self.context();
        let mut component_results = BTreeMap::new();
        for reverter in &plan {
            let component = reverter.component();
            let result = self.revert_one(&ctx, *reverter, &source).await;
            match result.status {
                ComponentStatus::Failed => {
                    error!(rollback = %request.id, %component, detail = %result.detail, "component rollback failed")
                }
                status => {
                    info!(rollback = %request.id, %component, ?status, validated = ?result.validated, "component rolled back")
                }
            }
            component_results.insert(component, result);
        }

        let status = RollbackOutcome::summarize(&component_results);
        let outcome = RollbackOutcome {
            id: request.id.clone(),
            rollback_type: request.rollback_type.clone(),
            target: request.target.clone(),
            component_results,
            pre_rollback_backup,
            status,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(rollback = %outcome.id, ?status, duration_ms = outcome.duration_ms, "rollback finished");
        Ok(outcome)
    }

    async fn revert_one(
        &self,
        ctx: &RevertContext<'_>,
        reverter: &dyn ComponentReverter,
        source: &Source,
    ) -> ComponentResult {
        let component = reverter.component();
        let to = match source {
            Source::Revision(n) => RevertTo::Revision(*n),
            Source::Backup(name, contents) => RevertTo::Snapshot { name, contents },
            Source::Previous {
                baseline: Some((name, contents)),
            } if reverter.restorable_from(contents) => RevertTo::Snapshot { name, contents },
            Source::Previous { .. } if reverter.accepts_revision() => RevertTo::Previous,
            Source::Previous { .. } => {
                return ComponentResult {
                    status: ComponentStatus::Failed,
                    validated: None,
                    detail: format!("no earlier backup to restore {component} from"),
                };
            }
        };

        let reversal = match reverter.revert(ctx, to).await {
            Ok(reversal) => reversal,
            Err(e) => {
                return ComponentResult {
                    status: ComponentStatus::Failed,
                    validated: None,
                    detail: e.to_string(),
                };
            }
        };
        match reverter.validate(ctx, to).await {
            Ok(()) => ComponentResult {
                status: reversal.status,
                validated: Some(true),
                detail: reversal.detail,
            },
            Err(e) => {
                warn!(%component, error = %e, "component validation failed");
                ComponentResult {
                    status: reversal.status,
                    validated: Some(false),
                    detail: format!("{}; {e}", reversal.detail),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rollguard_cluster::{FakeCluster, FakeOp, GatewayError, deployment_manifest, manifest};
    use rollguard_core::OutcomeStatus;
    use rollguard_health::GateSettings;
    use rollguard_state::{LeaseError, LeaseRegistry, StateStore};
    use serde_json::{Value, json};

    use super::*;
    use crate::confirm::FixedAnswer;
    use crate::database::tests::install_migrator;

    struct Harness {
        fake: Arc<FakeCluster>,
        executor: RollbackExecutor,
        leases: LeaseRegistry,
        _dir: tempfile::TempDir,
    }

    fn labelled(kind: &str, name: &str, component: &str, data: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": "prod",
                "labels": {"rollguard.io/component": component},
            },
            "data": {"value": data},
        })
    }

    fn harness(environment: &str, confirm: bool) -> Harness {
        let fake = Arc::new(FakeCluster::new());
        fake.seed(deployment_manifest("prod", "api", "api", "api:v1", 2, &[("app", "api")]));
        fake.seed(labelled("ConfigMap", "alerts", "monitoring", "v1"));
        fake.seed(labelled("ConfigMap", "routing", "infrastructure", "v1"));

        let mut config = RollguardConfig::default();
        config.environment = environment.to_string();
        config.namespace = "prod".to_string();
        config.workload.app = "api".to_string();
        config.health.max_attempts = 2;
        config.database.enabled = true;

        let dir = tempfile::tempdir().unwrap();
        let backups = BackupStore::new(dir.path().join("backups"), StateStore::open_in_memory().unwrap());
        let gate = HealthGate::new(fake.clone(), GateSettings::default());
        let executor = RollbackExecutor::from_config(
            &config,
            fake.clone(),
            gate,
            backups,
            Arc::new(FixedAnswer(confirm)),
        );
        Harness {
            fake,
            executor,
            leases: LeaseRegistry::new(),
            _dir: dir,
        }
    }

    /// Move every component forward from the state backed up as "known-good".
    async fn drift(h: &Harness) {
        use rollguard_cluster::ClusterGateway;
        h.fake
            .set_image("deployment", "api", "prod", "api", "api:v2")
            .await
            .unwrap();
        h.fake.seed(labelled("ConfigMap", "alerts", "monitoring", "v2"));
        h.fake.seed(labelled("ConfigMap", "routing", "infrastructure", "v2"));
    }

    fn data(h: &Harness, name: &str) -> String {
        h.fake.object("configmap", "prod", name).unwrap()["data"]["value"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn image(h: &Harness) -> String {
        let api = h.fake.object("deployment", "prod", "api").unwrap();
        manifest::container_image(&api, "api").unwrap().to_string()
    }

    fn mutations(h: &Harness) -> usize {
        h.fake
            .ops()
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    FakeOp::Apply { .. } | FakeOp::Undo { .. } | FakeOp::SetImage { .. }
                ) || matches!(op, FakeOp::Exec { command, .. } if command[1] == "goto")
            })
            .count()
    }

    fn request(rollback_type: RollbackType, target: &str) -> RollbackRequest {
        RollbackRequest::new(rollback_type, target.parse().unwrap(), "test", "operator", false)
    }

    #[tokio::test(start_paused = true)]
    async fn partial_touches_only_requested_components() {
        let h = harness("staging", true);
        install_migrator(&h.fake, 12);
        h.executor
            .create_backup("known-good", BTreeMap::new())
            .await
            .unwrap();
        drift(&h).await;
        let version = install_migrator(&h.fake, 13);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();

        let req = request(
            RollbackType::partial([Component::Application, Component::Monitoring]).unwrap(),
            "backup:known-good",
        );
        let outcome = h.executor.run(&req, &lease).await.unwrap();

        let keys: Vec<Component> = outcome.component_results.keys().copied().collect();
        assert_eq!(keys, vec![Component::Monitoring, Component::Application]);
        assert_eq!(outcome.status, OutcomeStatus::Success);
        for result in outcome.component_results.values() {
            assert_eq!(result.status, ComponentStatus::Reverted);
            assert_eq!(result.validated, Some(true));
        }
        assert_eq!(image(&h), "api:v1");
        assert_eq!(data(&h, "alerts"), "v1");
        // Untouched.
        assert_eq!(data(&h, "routing"), "v2");
        assert_eq!(version.load(std::sync::atomic::Ordering::SeqCst), 13);
        assert!(outcome.pre_rollback_backup.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn same_backup_twice_is_a_noop() {
        let h = harness("staging", true);
        let version = install_migrator(&h.fake, 5);
        h.executor
            .create_backup("known-good", BTreeMap::new())
            .await
            .unwrap();
        drift(&h).await;
        version.store(6, std::sync::atomic::Ordering::SeqCst);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();

        let first = h
            .executor
            .run(&request(RollbackType::Full, "backup:known-good"), &lease)
            .await
            .unwrap();
        assert_eq!(first.status, OutcomeStatus::Success);
        assert!(first
            .component_results
            .values()
            .all(|r| r.status == ComponentStatus::Reverted));
        assert_eq!(version.load(std::sync::atomic::Ordering::SeqCst), 5);

        let before = mutations(&h);
        let second = h
            .executor
            .run(&request(RollbackType::Full, "backup:known-good"), &lease)
            .await
            .unwrap();
        assert_eq!(second.status, OutcomeStatus::Success);
        assert_eq!(second.component_results.len(), 4);
        assert!(second
            .component_results
            .values()
            .all(|r| r.status == ComponentStatus::AlreadyAtTarget));
        assert_eq!(mutations(&h), before);
    }

    #[tokio::test(start_paused = true)]
    async fn revision_target_rejected_for_object_components() {
        let h = harness("staging", true);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();
        let err = h
            .executor
            .run(&request(RollbackType::Full, "revision:3"), &lease)
            .await
            .unwrap_err();
        assert!(matches!(err, RollbackError::InvalidTarget(_)));
        assert!(h.executor.backups().list().unwrap().is_empty());
        assert_eq!(mutations(&h), 0);

        // Application alone accepts it.
        drift(&h).await;
        let outcome = h
            .executor
            .run(&request(RollbackType::Application, "revision:1"), &lease)
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(image(&h), "api:v1");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_backup_is_reported() {
        let h = harness("staging", true);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();
        let err = h
            .executor
            .run(&request(RollbackType::Full, "backup:nope"), &lease)
            .await
            .unwrap_err();
        assert!(matches!(err, RollbackError::BackupNotFound(name) if name == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn production_requires_confirmation() {
        let h = harness("production", false);
        drift(&h).await;
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();
        let before = mutations(&h);

        let err = h
            .executor
            .run(&request(RollbackType::Application, "previous"), &lease)
            .await
            .unwrap_err();
        assert!(matches!(err, RollbackError::NotConfirmed));
        assert_eq!(mutations(&h), before);
        assert_eq!(image(&h), "api:v2");

        // Trigger-issued requests are pre-approved.
        let auto = RollbackRequest::new(
            RollbackType::Application,
            RollbackTarget::Previous,
            "error_rate",
            "trigger:error_rate",
            true,
        );
        let outcome = h.executor.run(&auto, &lease).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(image(&h), "api:v1");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_component_does_not_stop_the_rest() {
        let h = harness("staging", true);
        install_migrator(&h.fake, 3);
        h.executor
            .create_backup("known-good", BTreeMap::new())
            .await
            .unwrap();
        drift(&h).await;
        // Monitoring is restored first and takes the error.
        h.fake
            .inject("apply", [GatewayError::InvalidManifest("bad rule".to_string())]);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();

        let outcome = h
            .executor
            .run(&request(RollbackType::Full, "backup:known-good"), &lease)
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Partial);
        let results = &outcome.component_results;
        assert_eq!(results[&Component::Monitoring].status, ComponentStatus::Failed);
        assert_eq!(results[&Component::Monitoring].validated, None);
        assert_eq!(results[&Component::Application].status, ComponentStatus::Reverted);
        assert_eq!(results[&Component::Infrastructure].status, ComponentStatus::Reverted);
        assert_eq!(results[&Component::Database].status, ComponentStatus::AlreadyAtTarget);
        assert_eq!(data(&h, "routing"), "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn previous_restores_every_component_to_the_baseline() {
        let h = harness("staging", true);
        let version = install_migrator(&h.fake, 9);
        h.executor
            .create_backup("nightly", BTreeMap::new())
            .await
            .unwrap();
        drift(&h).await;
        version.store(10, std::sync::atomic::Ordering::SeqCst);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();

        let outcome = h
            .executor
            .run(&request(RollbackType::Full, "previous"), &lease)
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
        assert_eq!(image(&h), "api:v1");
        assert_eq!(data(&h, "alerts"), "v1");
        assert_eq!(data(&h, "routing"), "v1");
        assert_eq!(version.load(std::sync::atomic::Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_previous_stays_at_the_baseline() {
        let h = harness("staging", true);
        let version = install_migrator(&h.fake, 9);
        h.executor
            .create_backup("pre-deploy-1", BackupPurpose::PreDeploy.metadata())
            .await
            .unwrap();
        drift(&h).await;
        version.store(10, std::sync::atomic::Ordering::SeqCst);
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();

        let first = h
            .executor
            .run(&request(RollbackType::Full, "previous"), &lease)
            .await
            .unwrap();
        assert_eq!(first.status, OutcomeStatus::Success);
        assert!(first
            .component_results
            .values()
            .all(|r| r.status == ComponentStatus::Reverted));

        // The first run's safety copy holds the drifted state; it must not
        // become the next baseline.
        let before = mutations(&h);
        let second = h
            .executor
            .run(&request(RollbackType::Full, "previous"), &lease)
            .await
            .unwrap();
        assert_eq!(second.status, OutcomeStatus::Success);
        assert_eq!(second.component_results.len(), 4);
        assert!(second
            .component_results
            .values()
            .all(|r| r.status == ComponentStatus::AlreadyAtTarget));
        assert_eq!(mutations(&h), before);
        assert_eq!(image(&h), "api:v1");
        assert_eq!(version.load(std::sync::atomic::Ordering::SeqCst), 9);
        assert_eq!(h.executor.backups().list().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn previous_without_backups_fails_object_components() {
        let h = harness("staging", true);
        install_migrator(&h.fake, 9);
        drift(&h).await;
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();
        let req = request(
            RollbackType::partial([Component::Application, Component::Infrastructure]).unwrap(),
            "previous",
        );
        let outcome = h.executor.run(&req, &lease).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(
            outcome.component_results[&Component::Infrastructure].status,
            ComponentStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_lease_is_refused() {
        let h = harness("staging", true);
        let lease = h.leases.try_acquire("prod/other", "test").unwrap();
        let err = h
            .executor
            .run(&request(RollbackType::Full, "previous"), &lease)
            .await
            .unwrap_err();
        assert!(matches!(err, RollbackError::Lease(LeaseError::Mismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_database_is_skipped_for_full_and_refused_for_partial() {
        let h = {
            let mut h = harness("staging", true);
            let mut config = RollguardConfig::default();
            config.namespace = "prod".to_string();
            config.workload.app = "api".to_string();
            config.database.enabled = false;
            let dir = tempfile::tempdir().unwrap();
            let backups =
                BackupStore::new(dir.path().to_path_buf(), StateStore::open_in_memory().unwrap());
            h.executor = RollbackExecutor::from_config(
                &config,
                h.fake.clone(),
                HealthGate::new(h.fake.clone(), GateSettings::default()),
                backups,
                Arc::new(FixedAnswer(true)),
            );
            h._dir = dir;
            h
        };
        h.executor
            .create_backup("known-good", BTreeMap::new())
            .await
            .unwrap();
        let lease = h.leases.try_acquire("prod/api", "test").unwrap();

        let outcome = h
            .executor
            .run(&request(RollbackType::Full, "backup:known-good"), &lease)
            .await
            .unwrap();
        assert!(!outcome.component_results.contains_key(&Component::Database));

        let err = h
            .executor
            .run(&request(RollbackType::Database, "previous"), &lease)
            .await
            .unwrap_err();
        assert!(matches!(err, RollbackError::InvalidTarget(_)));
    }
}
