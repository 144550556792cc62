//! Blue-green rollout.
//!
//! The service's `color` label names the live color. A candidate workload
//! `{app}-{next}` is derived from the live one, rolled out, and gated.
//! Only a candidate that passed the gate receives traffic; a failed
//! candidate is deleted and the service is never touched.

use async_trait::async_trait;
use rollguard_cluster::manifest;
use rollguard_core::StrategyKind;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::context::RolloutContext;
use crate::error::{FailureCause, PhaseFailure};
use crate::strategy::RolloutDriver;

pub const COLOR_LABEL: &str = "color";

/// The two colors; anything unrecognised is treated as blue.
pub fn opposite(color: &str) -> &'static str {
    if color == "green" { "blue" } else { "green" }
}

pub struct BlueGreen;

#[async_trait]
impl RolloutDriver for BlueGreen {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlueGreen
    }

    async fn drive(&self, ctx: &mut RolloutContext<'_>) -> Result<(), PhaseFailure> {
        let idx = ctx.begin("determine_color");
        let result = current_color(ctx).await;
        let current = ctx.finish(idx, result)?;
        let next = opposite(&current);
        let candidate = format!("{}-{next}", ctx.settings.app);
        info!(deployment = %ctx.deployment.id, %current, %next, "blue-green colors");

        let idx = ctx.begin("create_candidate");
        let result = create_candidate(ctx, &current, next, &candidate).await;
        ctx.finish(idx, result)?;

        let selector = format!("{},{COLOR_LABEL}={next}", ctx.settings.app_selector);
        let idx = ctx.begin("await_candidate");
        let result = ctx.await_rollout(&candidate).await;
        let mut failure = ctx.finish(idx, result).err();

        if failure.is_none() {
            let idx = ctx.begin("health_gate");
            let result = ctx.gate(&candidate, &selector).await.map(|_| ());
            failure = ctx.finish(idx, result).err();
        }

        if let Some(failure) = failure {
            warn!(
                deployment = %ctx.deployment.id,
                %candidate,
                live = %current,
                "candidate rejected, traffic not switched"
            );
            let idx = ctx.begin("cleanup_candidate");
            let result = ctx.delete_workload(&candidate).await;
            // The candidate's failure is what the caller needs to see.
            let _ = ctx.finish(idx, result);
            return Err(failure);
        }

        let idx = ctx.begin("switch_traffic");
        ctx.mark_live_mutated();
        let result = switch_traffic(ctx, next).await;
        ctx.finish(idx, result)?;

        let idx = ctx.begin("drain");
        tokio::time::sleep(ctx.settings.drain_delay).await;
        ctx.finish(idx, Ok(()))?;

        let old = format!("{}-{current}", ctx.settings.app);
        let idx = ctx.begin("cleanup_old");
        let result = ctx.delete_workload(&old).await;
        ctx.finish(idx, result)?;
        Ok(())
    }
}

/// Read the live color from the service; default blue.
async fn current_color(ctx: &RolloutContext<'_>) -> Result<String, FailureCause> {
    let gateway = ctx.gateway;
    let ns = ctx.namespace();
    let service = &ctx.settings.service;
    let svc = ctx
        .call("get", || gateway.get("service", service, &ns))
        .await?;
    let color = manifest::label(&svc, COLOR_LABEL)
        .or_else(|| {
            svc.pointer("/spec/selector")
                .and_then(|s| s.get(COLOR_LABEL))
                .and_then(Value::as_str)
        })
        .unwrap_or("blue");
    Ok(color.to_string())
}

/// Derive the candidate from `{app}-{current}`, or `{app}` on first use.
async fn create_candidate(
    ctx: &RolloutContext<'_>,
    current: &str,
    next: &str,
    candidate: &str,
) -> Result<(), FailureCause> {
    let gateway = ctx.gateway;
    let ns = ctx.namespace();
    let app = &ctx.settings.app;
    let live_name = format!("{app}-{current}");

    let template = match ctx
        .call("get", || gateway.get("deployment", &live_name, &ns))
        .await
    {
        Ok(t) => t,
        Err(FailureCause::Gateway(e)) if e.is_not_found() => {
            ctx.call("get", || gateway.get("deployment", app, &ns))
                .await?
        }
        Err(e) => return Err(e),
    };

    let manifest = manifest::derive_workload(
        &template,
        candidate,
        &ctx.settings.app_container,
        &ctx.deployment.target_image,
        &[(COLOR_LABEL, next)],
        None,
    );
    ctx.call("apply", || gateway.apply(&manifest)).await?;
    Ok(())
}

/// Point the service (label and selector) at `next`.
async fn switch_traffic(ctx: &RolloutContext<'_>, next: &str) -> Result<(), FailureCause> {
    let gateway = ctx.gateway;
    let ns = ctx.namespace();
    let service = &ctx.settings.service;
    let patch = json!({
        "metadata": {"labels": {COLOR_LABEL: next}},
        "spec": {"selector": {COLOR_LABEL: next}},
    });
    ctx.call("patch", || gateway.patch("service", service, &ns, &patch))
        .await?;
    info!(deployment = %ctx.deployment.id, %service, color = %next, "traffic switched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rollguard_cluster::{FakeCluster, FakeOp, deployment_manifest, service_manifest};
    use rollguard_core::{Deployment, DeploymentState};
    use rollguard_health::{GateSettings, HealthGate};
    use rollguard_state::LeaseRegistry;
    use tokio::sync::watch;

    use crate::executor::StrategyExecutor;
    use crate::strategy::StrategySettings;

    use super::*;

    fn cluster() -> Arc<FakeCluster> {
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
        fake
    }

    async fn deploy(fake: &Arc<FakeCluster>) -> (Deployment, Result<(), crate::RolloutError>) {
        let gate = HealthGate::new(fake.clone(), GateSettings::default());
        let exec = StrategyExecutor::new(fake.clone(), gate, StrategySettings::for_app("api"));
        let leases = LeaseRegistry::new();
        let mut deployment = Deployment::new("prod", "api", StrategyKind::BlueGreen, "api:v2", None);
        let lease = leases.try_acquire(&deployment.lease_key(), "t").unwrap();
        let (_tx, rx) = watch::channel(false);
        let result = exec.run(&mut deployment, &lease, rx).await;
        (deployment, result)
    }

    fn service_color(fake: &FakeCluster) -> String {
        let svc = fake.object("service", "prod", "api").unwrap();
        svc.pointer("/spec/selector/color")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn colors_alternate() {
        assert_eq!(opposite("blue"), "green");
        assert_eq!(opposite("green"), "blue");
        assert_eq!(opposite("purple"), "green");
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_candidate_takes_traffic() {
        let fake = cluster();
        let started = tokio::time::Instant::now();
        let (deployment, result) = deploy(&fake).await;
        result.unwrap();

        assert_eq!(deployment.state, DeploymentState::Succeeded);
        assert_eq!(service_color(&fake), "green");
        let green = fake.object("deployment", "prod", "api-green").unwrap();
        assert_eq!(manifest::container_image(&green, "api"), Some("api:v2"));
        assert_eq!(manifest::label(&green, "color"), Some("green"));
        assert!(fake.object("deployment", "prod", "api-blue").is_none());
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_gate_never_switches_traffic() {
        let fake = cluster();
        fake.set_healthy("api-green", false);
        let (deployment, result) = deploy(&fake).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("health_gate"));
        assert_eq!(deployment.state, DeploymentState::Failed);
        assert!(!deployment.live_mutated);
        assert_eq!(service_color(&fake), "blue");
        assert!(fake.patches_to("service", "api").is_empty());
        assert!(fake.object("deployment", "prod", "api-green").is_none());
        assert!(fake.object("deployment", "prod", "api-blue").is_some());
        assert_eq!(deployment.phases.last().unwrap().name, "cleanup_candidate");
        // Ten attempts, two replicas each.
        assert_eq!(fake.probe_count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_candidate_is_cleaned_up() {
        let fake = cluster();
        fake.stall("api-green");
        let (deployment, result) = deploy(&fake).await;
        result.unwrap_err();
        assert_eq!(deployment.failed_phase().unwrap().name, "await_candidate");
        assert_eq!(service_color(&fake), "blue");
        assert!(fake.object("deployment", "prod", "api-green").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn green_goes_back_to_blue() {
        let fake = Arc::new(FakeCluster::new());
        fake.seed(deployment_manifest(
            "prod",
            "api-green",
            "api",
            "api:v1",
            2,
            &[("app", "api"), ("color", "green")],
        ));
        fake.seed(service_manifest("prod", "api", &[("app", "api"), ("color", "green")]));
        let (_deployment, result) = deploy(&fake).await;
        result.unwrap();
        assert_eq!(service_color(&fake), "blue");
        assert!(fake.object("deployment", "prod", "api-blue").is_some());
        assert!(fake.object("deployment", "prod", "api-green").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_derives_from_plain_workload() {
        let fake = Arc::new(FakeCluster::new());
        fake.seed(deployment_manifest("prod", "api", "api", "api:v1", 2, &[("app", "api")]));
        fake.seed(service_manifest("prod", "api", &[("app", "api")]));
        let (_deployment, result) = deploy(&fake).await;
        result.unwrap();
        assert_eq!(service_color(&fake), "green");
        assert!(fake.object("deployment", "prod", "api-green").is_some());
        // The plain workload is not a color, so it is left alone.
        assert!(fake.object("deployment", "prod", "api").is_some());
        assert!(fake.ops().iter().any(
            |op| matches!(op, FakeOp::Delete { name, .. } if name == "api-blue")
        ));
    }
}
