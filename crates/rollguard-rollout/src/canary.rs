//! Canary rollout.
//!
//! Runs `{app}-canary` with the new image next to the primary, gates it,
//! then re-checks it every `canary_interval` for `canary_duration`. The
//! first failed check aborts: the canary is deleted and the primary is
//! never touched. A clean window promotes the image to the primary.

use async_trait::async_trait;
use rollguard_cluster::manifest;
use rollguard_core::StrategyKind;
use rollguard_health::GateTarget;
use tracing::{debug, info, warn};

use crate::context::RolloutContext;
use crate::error::{FailureCause, PhaseFailure};
use crate::rolling::{await_rollouts, update_images};
use crate::strategy::RolloutDriver;

pub const TRACK_LABEL: &str = "track";

pub struct Canary;

#[async_trait]
impl RolloutDriver for Canary {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Canary
    }

    async fn drive(&self, ctx: &mut RolloutContext<'_>) -> Result<(), PhaseFailure> {
        let canary = format!("{}-canary", ctx.settings.app);
        let selector = ctx.settings.canary_selector.clone();

        let idx = ctx.begin("create_canary");
        let result = create_canary(ctx, &canary).await;
        ctx.finish(idx, result)?;

        if let Err(failure) = observe(ctx, &canary, &selector).await {
            warn!(deployment = %ctx.deployment.id, %canary, "canary aborted");
            let idx = ctx.begin("abort_canary");
            let result = ctx.delete_workload(&canary).await;
            let _ = ctx.finish(idx, result);
            return Err(failure);
        }

        let idx = ctx.begin("promote");
        ctx.mark_live_mutated();
        let result = update_images(ctx).await;
        ctx.finish(idx, result)?;

        let idx = ctx.begin("await_promotion");
        let result = await_rollouts(ctx).await;
        ctx.finish(idx, result)?;

        let idx = ctx.begin("cleanup_canary");
        let result = ctx.delete_workload(&canary).await;
        ctx.finish(idx, result)?;
        info!(deployment = %ctx.deployment.id, "canary promoted");
        Ok(())
    }
}

async fn create_canary(ctx: &RolloutContext<'_>, canary: &str) -> Result<(), FailureCause> {
    let gateway = ctx.gateway;
    let ns = ctx.namespace();
    let app = &ctx.settings.app;
    let template = ctx
        .call("get", || gateway.get("deployment", app, &ns))
        .await?;
    let manifest = manifest::derive_workload(
        &template,
        canary,
        &ctx.settings.app_container,
        &ctx.deployment.target_image,
        &[(TRACK_LABEL, "canary")],
        Some(ctx.settings.canary_replicas),
    );
    ctx.call("apply", || gateway.apply(&manifest)).await?;
    Ok(())
}

/// `await_canary` → `canary_gate` → `monitor_window`; stops at the first
/// failed phase.
async fn observe(
    ctx: &mut RolloutContext<'_>,
    canary: &str,
    selector: &str,
) -> Result<(), PhaseFailure> {
    let idx = ctx.begin("await_canary");
    let result = ctx.await_rollout(canary).await;
    ctx.finish(idx, result)?;

    let idx = ctx.begin("canary_gate");
    let result = ctx.gate(canary, selector).await.map(|_| ());
    ctx.finish(idx, result)?;

    let idx = ctx.begin("monitor_window");
    let result = monitor_window(ctx, canary, selector).await;
    ctx.finish(idx, result)
}

/// Re-check the canary every interval until the window closes.
async fn monitor_window(
    ctx: &mut RolloutContext<'_>,
    canary: &str,
    selector: &str,
) -> Result<(), FailureCause> {
    let target = GateTarget::deployment(&ctx.deployment.namespace, canary, selector);
    let duration = ctx.settings.canary_duration;
    let interval = ctx.settings.canary_interval;
    let mut observed = std::time::Duration::ZERO;
    let mut checks = 0u32;

    while observed < duration {
        let step = interval.min(duration - observed);
        ctx.sleep_or_cancel(step).await?;
        observed += step;
        checks += 1;

        let report = ctx.gate.check(&target).await;
        if !report.ready {
            let reason = report.reason.unwrap_or_else(|| "not ready".to_string());
            warn!(deployment = %ctx.deployment.id, check = checks, %reason, "canary check failed");
            return Err(FailureCause::CanaryCheck(reason));
        }
        debug!(deployment = %ctx.deployment.id, check = checks, ?observed, "canary check passed");
    }
    Ok(())
}
