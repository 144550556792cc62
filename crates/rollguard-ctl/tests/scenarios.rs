//! End-to-end scenarios driven through the orchestrator against the
//! in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use rollguard_cluster::{
    ClusterGateway, FakeCluster, FakeOp, GatewayError, deployment_manifest, manifest,
    service_manifest,
};
use rollguard_core::{
    AutoRollback, Component, ComponentStatus, DeploymentState, OutcomeStatus, PhaseStatus,
    RollbackRequest, RollbackTarget, RollbackType, RollguardConfig, StrategyKind, epoch_millis,
};
use rollguard_ctl::cluster_lease::EXPIRES_AT;
use rollguard_ctl::{DeployRequest, MonitorReport, Orchestrator, OrchestratorError};
use rollguard_rollback::FixedAnswer;
use rollguard_state::{HistoryEntry, LeaseError, LeaseRegistry, StateStore};
use serde_json::{Value, json};
use tokio::sync::watch;

struct Harness {
    fake: Arc<FakeCluster>,
    orchestrator: Orchestrator,
    _dir: tempfile::TempDir,
}

fn config() -> RollguardConfig {
    let mut config = RollguardConfig::default();
    config.namespace = "prod".to_string();
    config.workload.app = "api".to_string();
    config.health.max_attempts = 3;
    config.rollout.lease_attempts = 2;
    config.rollout.lease_backoff = "1s".to_string();
    config.triggers.monitoring_interval = "60s".to_string();
    config.database.enabled = false;
    config
}

fn harness(config: RollguardConfig, fake: Arc<FakeCluster>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        config,
        fake.clone(),
        StateStore::open_in_memory().unwrap(),
        dir.path().join("backups"),
        Arc::new(FixedAnswer(true)),
    )
    .with_holder("test");
    Harness {
        fake,
        orchestrator,
        _dir: dir,
    }
}

fn rolling_cluster() -> Arc<FakeCluster> {
    let fake = Arc::new(FakeCluster::new());
    fake.seed(deployment_manifest("prod", "api", "api", "api:v1", 2, &[("app", "api")]));
    fake
}

fn labelled(name: &str, component: &str, data: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": "prod",
            "labels": {"rollguard.io/component": component},
        },
        "data": {"value": data},
    })
}

fn image(fake: &FakeCluster, name: &str) -> String {
    let object = fake.object("deployment", "prod", name).unwrap();
    manifest::container_image(&object, "api")
        .unwrap_or_default()
        .to_string()
}

#[tokio::test(start_paused = true)]
async fn rolling_deploy_succeeds() {
    let (_tx, shutdown) = watch::channel(false);
    let h = harness(config(), rolling_cluster());
    let request = DeployRequest::new(h.orchestrator.config(), "api:v2");

    let report = h.orchestrator.deploy(&request, shutdown).await.unwrap();

    let d = &report.deployment;
    assert_eq!(d.final_state, DeploymentState::Succeeded);
    assert_eq!(d.rollback, AutoRollback::NotApplicable);
    assert_eq!(d.phases.len(), 2);
    assert!(d.phases.iter().all(|p| p.status == PhaseStatus::Completed));
    assert_eq!(report.status(), OutcomeStatus::Success);
    assert!(report.monitor.is_none());
    assert_eq!(image(&h.fake, "api"), "api:v2");

    let history = h.orchestrator.history(10).unwrap();
    assert!(matches!(
        &history[..],
        [HistoryEntry::Deployment { outcome, .. }] if outcome.id == d.id
    ));
}

#[tokio::test(start_paused = true)]
async fn blue_green_gate_failure_keeps_traffic_on_blue() {
    let (_tx, shutdown) = watch::channel(false);
    let fake = Arc::new(FakeCluster::new());
    fake.seed(deployment_manifest(
        "prod",
        "api-blue",
        "api",
        "api:v1",
        2,
        &[("app", "api"), ("color", "blue")],
    ));
    fake.seed(service_manifest("prod", "api", &[("app", "api"), ("color", "blue")]));
    fake.set_healthy("api-green", false);
    let h = harness(config(), fake);
    let mut request = DeployRequest::new(h.orchestrator.config(), "api:v2");
    request.strategy = StrategyKind::BlueGreen;

    let report = h.orchestrator.deploy(&request, shutdown).await.unwrap();

    let d = &report.deployment;
    assert_eq!(d.final_state, DeploymentState::Failed);
    assert_eq!(d.failed_phase.as_deref(), Some("health_gate"));
    assert_eq!(d.rollback, AutoRollback::NotRequired);
    let svc = h.fake.object("service", "prod", "api").unwrap();
    assert_eq!(svc["spec"]["selector"]["color"], "blue");
    assert!(h.fake.object("deployment", "prod", "api-green").is_none());
    assert!(h.fake.object("deployment", "prod", "api-blue").is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_rolling_update_is_rolled_back() {
    let (_tx, shutdown) = watch::channel(false);
    let fake = rolling_cluster();
    fake.inject(
        "rollout_status",
        [GatewayError::Permanent("deadline exceeded for api".to_string())],
    );
    let h = harness(config(), fake);
    let request = DeployRequest::new(h.orchestrator.config(), "api:v2");

    let report = h.orchestrator.deploy(&request, shutdown).await.unwrap();

    let d = &report.deployment;
    assert_eq!(d.failed_phase.as_deref(), Some("await_rollout"));
    let AutoRollback::Attempted { outcome } = &d.rollback else {
        panic!("expected a rollback, got {:?}", d.rollback);
    };
    assert_eq!(outcome.rollback_type, RollbackType::Application);
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert!(outcome.pre_rollback_backup.is_some());
    assert_eq!(d.final_state, DeploymentState::RolledBack);
    assert_eq!(image(&h.fake, "api"), "api:v1");

    let mut kinds: Vec<&str> = h
        .orchestrator
        .history(10)
        .unwrap()
        .iter()
        .map(|e| match e {
            HistoryEntry::Deployment { .. } => "deployment",
            HistoryEntry::Rollback { .. } => "rollback",
        })
        .collect();
    kinds.sort();
    assert_eq!(kinds, ["deployment", "rollback"]);
}

#[tokio::test(start_paused = true)]
async fn disabled_hook_leaves_the_failure_in_place() {
    let (_tx, shutdown) = watch::channel(false);
    let fake = rolling_cluster();
    fake.inject("rollout_status", [GatewayError::Permanent("boom".to_string())]);
    let h = harness(config(), fake);
    let mut request = DeployRequest::new(h.orchestrator.config(), "api:v2");
    request.rollback_on_failure = false;

    let report = h.orchestrator.deploy(&request, shutdown).await.unwrap();

    assert_eq!(report.deployment.rollback, AutoRollback::Disabled);
    assert_eq!(report.deployment.final_state, DeploymentState::Failed);
    assert_eq!(image(&h.fake, "api"), "api:v2");
    assert!(!h.fake.ops().iter().any(|op| matches!(op, FakeOp::Undo { .. })));
}

#[tokio::test(start_paused = true)]
async fn error_rate_after_deploy_triggers_full_rollback() {
    let (_tx, shutdown) = watch::channel(false);
    let fake = rolling_cluster();
    let h = harness(config(), fake);

    // Both replicas fail every probe from t=0 through t=300 (six samples),
    // then answer again.
    h.fake.script_probes("api", [false; 12]);
    let mut request = DeployRequest::new(h.orchestrator.config(), "api:v2");
    request.monitor = true;
    let started = tokio::time::Instant::now();

    let report = h.orchestrator.deploy(&request, shutdown).await.unwrap();

    assert_eq!(report.deployment.final_state, DeploymentState::Succeeded);
    assert!(report.deployment.baseline_backup.is_some());
    let Some(MonitorReport::RolledBack { request, outcome }) = &report.monitor else {
        panic!("expected the monitor to roll back, got {:?}", report.monitor);
    };
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert_eq!(request.initiated_by, "trigger:error_rate");
    assert!(request.auto_approved);
    assert_eq!(outcome.rollback_type, RollbackType::Full);
    assert_eq!(outcome.target, RollbackTarget::Previous);
    assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
    assert_eq!(
        outcome.component_results[&Component::Application].status,
        ComponentStatus::Reverted
    );
    assert!(!outcome.component_results.contains_key(&Component::Database));
    assert_eq!(report.status(), OutcomeStatus::Partial);
    assert_eq!(image(&h.fake, "api"), "api:v1");

    // The deployment and the rollback it caused are both on record.
    assert_eq!(h.orchestrator.history(10).unwrap().len(), 2);

    // Asking for previous again lands on the same baseline.
    let again = RollbackRequest::new(
        RollbackType::Full,
        RollbackTarget::Previous,
        "double check",
        "alice",
        false,
    );
    let outcome = h.orchestrator.rollback(&again).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
    assert!(
        outcome
            .component_results
            .values()
            .all(|r| r.status == ComponentStatus::AlreadyAtTarget)
    );
    assert_eq!(image(&h.fake, "api"), "api:v1");
}

#[tokio::test(start_paused = true)]
async fn error_rate_after_blue_green_moves_traffic_back() {
    let (_tx, shutdown) = watch::channel(false);
    let fake = Arc::new(FakeCluster::new());
    fake.seed(deployment_manifest(
        "prod",
        "api-blue",
        "api",
        "api:v1",
        2,
        &[("app", "api"), ("color", "blue")],
    ));
    fake.seed(service_manifest("prod", "api", &[("app", "api"), ("color", "blue")]));
    // Green passes its gate, then fails every sample once it has traffic.
    fake.set_healthy("api-green", false);
    fake.script_probes("api-green", [true; 2]);
    let mut config = config();
    config.rollout.strategy = StrategyKind::BlueGreen;
    let h = harness(config, fake);
    let mut request = DeployRequest::new(h.orchestrator.config(), "api:v2");
    request.monitor = true;

    let report = h.orchestrator.deploy(&request, shutdown).await.unwrap();

    assert_eq!(report.deployment.final_state, DeploymentState::Succeeded);
    let Some(MonitorReport::RolledBack { request, outcome }) = &report.monitor else {
        panic!("expected the monitor to roll back, got {:?}", report.monitor);
    };
    assert_eq!(request.initiated_by, "trigger:error_rate");
    assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
    assert_eq!(
        outcome.component_results[&Component::Application].status,
        ComponentStatus::Reverted
    );
    let svc = h.fake.object("service", "prod", "api").unwrap();
    assert_eq!(svc["spec"]["selector"]["color"], "blue");
    assert_eq!(image(&h.fake, "api-blue"), "api:v1");
    assert!(h.fake.object("deployment", "prod", "api-green").is_none());
}

#[tokio::test(start_paused = true)]
async fn monitor_reports_a_rollback_that_could_not_run() {
    let (_tx, shutdown) = watch::channel(false);
    let leases = LeaseRegistry::new();
    let fake = rolling_cluster();
    fake.script_probes("api", [false; 12]);
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        config(),
        fake.clone(),
        StateStore::open_in_memory().unwrap(),
        dir.path().join("backups"),
        Arc::new(FixedAnswer(true)),
    )
    .with_leases(leases.clone());
    let _held = leases.try_acquire("prod/api", "someone-else").unwrap();

    let report = orchestrator
        .monitor(Some(Duration::from_secs(600)), shutdown)
        .await
        .unwrap();

    let MonitorReport::RollbackErrored { request, error } = &report else {
        panic!("expected an errored rollback, got {report:?}");
    };
    assert!(error.contains("someone-else"), "{error}");
    let history = orchestrator.history(10).unwrap();
    let [HistoryEntry::Rollback { outcome, .. }] = &history[..] else {
        panic!("expected one rollback on record, got {history:?}");
    };
    assert_eq!(outcome.id, request.id);
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.component_results.is_empty());
    assert!(outcome.error.as_deref().is_some_and(|e| e.contains("someone-else")));
}

#[tokio::test(start_paused = true)]
async fn cluster_lease_held_elsewhere_blocks_deploy() {
    let (_tx, shutdown) = watch::channel(false);
    let fake = rolling_cluster();
    let expires = (epoch_millis() + 3_600_000).to_string();
    fake.seed(json!({
        "apiVersion": "coordination.k8s.io/v1",
        "kind": "Lease",
        "metadata": {
            "name": "rollguard-api",
            "namespace": "prod",
            "annotations": { EXPIRES_AT: expires },
        },
        "spec": { "holderIdentity": "other-host", "leaseDurationSeconds": 300 },
    }));
    let h = harness(config(), fake);
    let request = DeployRequest::new(h.orchestrator.config(), "api:v2");

    let err = h.orchestrator.deploy(&request, shutdown).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Lease(LeaseError::Contention { ref holder, .. }) if holder == "other-host"
    ));
    assert!(!h.fake.ops().iter().any(|op| matches!(op, FakeOp::SetImage { .. })));
    assert!(h.orchestrator.list_backups().unwrap().is_empty());
    let lease = h.fake.object("lease", "prod", "rollguard-api").unwrap();
    assert_eq!(lease["spec"]["holderIdentity"], "other-host");
}

#[tokio::test(start_paused = true)]
async fn deploy_releases_its_cluster_lease() {
    let (_tx, shutdown) = watch::channel(false);
    let h = harness(config(), rolling_cluster());
    let request = DeployRequest::new(h.orchestrator.config(), "api:v2");

    h.orchestrator.deploy(&request, shutdown).await.unwrap();

    let applied = h.fake.ops();
    assert!(
        applied
            .iter()
            .any(|op| matches!(op, FakeOp::Apply { kind, .. } if kind == "lease"))
    );
    assert!(h.fake.object("lease", "prod", "rollguard-api").is_none());
}

#[tokio::test(start_paused = true)]
async fn partial_rollback_from_backup_leaves_other_components() {
    let fake = rolling_cluster();
    fake.seed(labelled("alerts", "monitoring", "v1"));
    fake.seed(labelled("routing", "infrastructure", "v1"));
    let mut config = config();
    config.environment = "production".to_string();
    let h = harness(config, fake);
    h.orchestrator.create_backup(Some("pre-change")).await.unwrap();

    h.fake
        .set_image("deployment", "api", "prod", "api", "api:v3")
        .await
        .unwrap();
    h.fake.seed(labelled("alerts", "monitoring", "v2"));
    h.fake.seed(labelled("routing", "infrastructure", "v2"));

    let request = RollbackRequest::new(
        RollbackType::partial([Component::Monitoring, Component::Application]).unwrap(),
        "backup:pre-change".parse().unwrap(),
        "bad alert rules",
        "alice",
        false,
    );
    let outcome = h.orchestrator.rollback(&request).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Success, "{outcome:?}");
    assert_eq!(outcome.component_results.len(), 2);
    assert_eq!(image(&h.fake, "api"), "api:v1");
    let alerts = h.fake.object("configmap", "prod", "alerts").unwrap();
    assert_eq!(alerts["data"]["value"], "v1");
    let routing = h.fake.object("configmap", "prod", "routing").unwrap();
    assert_eq!(routing["data"]["value"], "v2");

    let safety = outcome.pre_rollback_backup.clone().unwrap();
    let backups = h.orchestrator.list_backups().unwrap();
    assert_eq!(backups.len(), 2);
    assert!(backups.iter().any(|b| b.id == safety));
}

#[tokio::test(start_paused = true)]
async fn held_lease_blocks_deploy() {
    let (_tx, shutdown) = watch::channel(false);
    let leases = LeaseRegistry::new();
    let fake = rolling_cluster();
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(
        config(),
        fake.clone(),
        StateStore::open_in_memory().unwrap(),
        dir.path().join("backups"),
        Arc::new(FixedAnswer(true)),
    )
    .with_leases(leases.clone());
    let _held = leases.try_acquire("prod/api", "someone-else").unwrap();

    let request = DeployRequest::new(orchestrator.config(), "api:v2");
    let err = orchestrator.deploy(&request, shutdown).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Lease(LeaseError::Contention { ref holder, .. }) if holder == "someone-else"
    ));
    assert!(!fake.ops().iter().any(|op| matches!(op, FakeOp::SetImage { .. })));
    assert!(orchestrator.history(10).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn preflight_rejects_a_bad_image_before_anything_runs() {
    let (_tx, shutdown) = watch::channel(false);
    let h = harness(config(), rolling_cluster());
    let request = DeployRequest::new(h.orchestrator.config(), "API V2");

    let err = h.orchestrator.deploy(&request, shutdown).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Preflight(_)));
    assert!(h.fake.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn monitor_stops_after_its_budget() {
    let (_tx, shutdown) = watch::channel(false);
    let h = harness(config(), rolling_cluster());
    let report = h
        .orchestrator
        .monitor(Some(Duration::from_secs(600)), shutdown)
        .await
        .unwrap();
    assert_eq!(report, MonitorReport::Completed);
    assert!(h.orchestrator.history(10).unwrap().is_empty());
}
