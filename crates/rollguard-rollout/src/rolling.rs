//! Rolling update.
//!
//! Points the app (and worker, if any) at the new image and lets the
//! orchestrator replace instances. Phases: `update_images`,
//! `await_rollout`.

use async_trait::async_trait;
use rollguard_core::StrategyKind;
use tracing::debug;

use crate::context::RolloutContext;
use crate::error::{FailureCause, PhaseFailure};
use crate::strategy::RolloutDriver;

pub struct Rolling;

#[async_trait]
impl RolloutDriver for Rolling {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rolling
    }

    async fn drive(&self, ctx: &mut RolloutContext<'_>) -> Result<(), PhaseFailure> {
        let idx = ctx.begin("update_images");
        ctx.mark_live_mutated();
        let result = update_images(ctx).await;
        ctx.finish(idx, result)?;

        let idx = ctx.begin("await_rollout");
        let result = await_rollouts(ctx).await;
        ctx.finish(idx, result)?;
        Ok(())
    }
}

/// Image the worker runs: its own if given, else the app's.
pub(crate) fn worker_image(ctx: &RolloutContext<'_>) -> String {
    ctx.deployment
        .worker_image
        .clone()
        .unwrap_or_else(|| ctx.deployment.target_image.clone())
}

/// Set the app image, then the worker image.
pub(crate) async fn update_images(ctx: &RolloutContext<'_>) -> Result<(), FailureCause> {
    let gateway = ctx.gateway;
    let ns = ctx.namespace();
    let settings = ctx.settings;
    let image = ctx.deployment.target_image.clone();

    ctx.call("set_image", || {
        gateway.set_image("deployment", &settings.app, &ns, &settings.app_container, &image)
    })
    .await?;
    debug!(workload = %settings.app, %image, "app image updated");

    if let Some(worker) = &settings.worker {
        let container = settings.worker_container.as_deref().unwrap_or(worker);
        let image = worker_image(ctx);
        ctx.call("set_image", || {
            gateway.set_image("deployment", worker, &ns, container, &image)
        })
        .await?;
        debug!(workload = %worker, %image, "worker image updated");
    }
    Ok(())
}

/// Wait for the app rollout, then the worker rollout.
pub(crate) async fn await_rollouts(ctx: &RolloutContext<'_>) -> Result<(), FailureCause> {
    ctx.await_rollout(&ctx.settings.app).await?;
    if let Some(worker) = &ctx.settings.worker {
        ctx.await_rollout(worker).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rollguard_cluster::{FakeCluster, FakeOp, GatewayError, deployment_manifest, manifest};
    use rollguard_core::{Deployment, DeploymentState, PhaseStatus};
    use rollguard_health::{GateSettings, HealthGate};
    use rollguard_state::LeaseRegistry;
    use tokio::sync::watch;

    use crate::executor::StrategyExecutor;
    use crate::strategy::StrategySettings;

    use super::*;

    fn cluster() -> Arc<FakeCluster> {
        let fake = Arc::new(FakeCluster::new());
        fake.seed(deployment_manifest("prod", "api", "api", "api:v1", 3, &[("app", "api")]));
        fake.seed(deployment_manifest(
            "prod",
            "api-worker",
            "worker",
            "api:v1",
            2,
            &[("app", "api-worker")],
        ));
        fake
    }

    fn executor(fake: &Arc<FakeCluster>, settings: StrategySettings) -> StrategyExecutor {
        let gate = HealthGate::new(fake.clone(), GateSettings::default());
        StrategyExecutor::new(fake.clone(), gate, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_v1_to_v2_succeeds() {
        let fake = cluster();
        let exec = executor(&fake, StrategySettings::for_app("api"));
        let leases = LeaseRegistry::new();
        let mut deployment = Deployment::new("prod", "api", StrategyKind::Rolling, "api:v2", None);
        let lease = leases.try_acquire(&deployment.lease_key(), &deployment.id).unwrap();
        let (_tx, rx) = watch::channel(false);

        exec.run(&mut deployment, &lease, rx).await.unwrap();

        assert_eq!(deployment.state, DeploymentState::Succeeded);
        assert_eq!(deployment.phases.len(), 2);
        assert!(deployment.phases.iter().all(|p| p.status == PhaseStatus::Completed));
        let live = fake.object("deployment", "prod", "api").unwrap();
        assert_eq!(manifest::container_image(&live, "api"), Some("api:v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_follows_app() {
        let fake = cluster();
        let mut settings = StrategySettings::for_app("api");
        settings.worker = Some("api-worker".to_string());
        settings.worker_container = Some("worker".to_string());
        let exec = executor(&fake, settings);
        let leases = LeaseRegistry::new();
        let mut deployment =
            Deployment::new("prod", "api", StrategyKind::Rolling, "api:v2", Some("api-worker:v2"));
        let lease = leases.try_acquire(&deployment.lease_key(), "t").unwrap();
        let (_tx, rx) = watch::channel(false);

        exec.run(&mut deployment, &lease, rx).await.unwrap();

        let worker = fake.object("deployment", "prod", "api-worker").unwrap();
        assert_eq!(manifest::container_image(&worker, "worker"), Some("api-worker:v2"));
        let order: Vec<FakeOp> = fake
            .ops()
            .into_iter()
            .filter(|op| matches!(op, FakeOp::SetImage { .. } | FakeOp::RolloutStatus { .. }))
            .collect();
        assert!(matches!(&order[0], FakeOp::SetImage { name, .. } if name == "api"));
        assert!(matches!(&order[1], FakeOp::SetImage { name, .. } if name == "api-worker"));
        assert!(matches!(&order[2], FakeOp::RolloutStatus { name } if name == "api"));
        assert!(matches!(&order[3], FakeOp::RolloutStatus { name } if name == "api-worker"));
    }

    #[tokio::test(start_paused = true)]
    async fn rollout_timeout_fails_the_deployment() {
        let fake = cluster();
        fake.stall("api");
        let exec = executor(&fake, StrategySettings::for_app("api"));
        let leases = LeaseRegistry::new();
        let mut deployment = Deployment::new("prod", "api", StrategyKind::Rolling, "api:v2", None);
        let lease = leases.try_acquire(&deployment.lease_key(), "t").unwrap();
        let (_tx, rx) = watch::channel(false);

        let err = exec.run(&mut deployment, &lease, rx).await.unwrap_err();

        assert_eq!(deployment.state, DeploymentState::Failed);
        assert_eq!(deployment.failed_phase().unwrap().name, "await_rollout");
        assert!(deployment.live_mutated);
        assert!(err.to_string().contains("did not finish rolling out"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_within_budget() {
        let fake = cluster();
        fake.inject(
            "set_image",
            [
                GatewayError::Transient("i/o timeout".to_string()),
                GatewayError::Transient("i/o timeout".to_string()),
            ],
        );
        let exec = executor(&fake, StrategySettings::for_app("api"));
        let leases = LeaseRegistry::new();
        let mut deployment = Deployment::new("prod", "api", StrategyKind::Rolling, "api:v2", None);
        let lease = leases.try_acquire(&deployment.lease_key(), "t").unwrap();
        let (_tx, rx) = watch::channel(false);

        exec.run(&mut deployment, &lease, rx).await.unwrap();
        assert_eq!(deployment.state, DeploymentState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_immediately() {
        let fake = cluster();
        fake.inject("set_image", [GatewayError::AuthDenied("forbidden".to_string())]);
        let exec = executor(&fake, StrategySettings::for_app("api"));
        let leases = LeaseRegistry::new();
        let mut deployment = Deployment::new("prod", "api", StrategyKind::Rolling, "api:v2", None);
        let lease = leases.try_acquire(&deployment.lease_key(), "t").unwrap();
        let (_tx, rx) = watch::channel(false);

        exec.run(&mut deployment, &lease, rx).await.unwrap_err();
        assert_eq!(deployment.failed_phase().unwrap().name, "update_images");
        assert_eq!(deployment.phases.len(), 1);
    }
}
