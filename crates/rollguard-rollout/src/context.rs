//! State shared by the phases of one rollout.

use std::future::Future;
use std::time::Duration;

use rollguard_cluster::{ClusterGateway, GatewayResult, RolloutState, retry_transient};
use rollguard_core::{Deployment, HealthVerdict};
use rollguard_health::{GateTarget, HealthGate};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{FailureCause, PhaseFailure};
use crate::strategy::StrategySettings;

pub struct RolloutContext<'a> {
    pub gateway: &'a dyn ClusterGateway,
    pub gate: &'a HealthGate,
    pub settings: &'a StrategySettings,
    pub deployment: &'a mut Deployment,
    shutdown: watch::Receiver<bool>,
}

impl<'a> RolloutContext<'a> {
    pub fn new(
        gateway: &'a dyn ClusterGateway,
        gate: &'a HealthGate,
        settings: &'a StrategySettings,
        deployment: &'a mut Deployment,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            gate,
            settings,
            deployment,
            shutdown,
        }
    }

    pub fn namespace(&self) -> String {
        self.deployment.namespace.clone()
    }

    // ── Phase log ──────────────────────────────────────────────────

    pub fn begin(&mut self, phase: &str) -> usize {
        info!(deployment = %self.deployment.id, %phase, "phase started");
        self.deployment.begin_phase(phase)
    }

    /// Close the phase at `index` from its result.
    pub fn finish<T>(
        &mut self,
        index: usize,
        result: Result<T, FailureCause>,
    ) -> Result<T, PhaseFailure> {
        let phase = self
            .deployment
            .phases
            .get(index)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        match result {
            Ok(value) => {
                self.deployment.complete_phase(index);
                info!(deployment = %self.deployment.id, %phase, "phase completed");
                Ok(value)
            }
            Err(cause) => {
                self.deployment.fail_phase(index, &cause.to_string());
                warn!(deployment = %self.deployment.id, %phase, error = %cause, "phase failed");
                Err(PhaseFailure { phase, cause })
            }
        }
    }

    /// Record that traffic-serving state is about to change.
    pub fn mark_live_mutated(&mut self) {
        self.deployment.live_mutated = true;
    }

    // ── Cluster calls ──────────────────────────────────────────────

    /// Run a gateway call under the strategy's transient retry budget.
    pub async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, FailureCause>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        retry_transient(
            operation,
            self.settings.retry_budget,
            self.settings.retry_backoff,
            op,
        )
        .await
        .map_err(FailureCause::Gateway)
    }

    /// Wait for a deployment's rollout; a timeout fails the phase.
    pub async fn await_rollout(&self, name: &str) -> Result<(), FailureCause> {
        let gateway = self.gateway;
        let ns = self.namespace();
        let timeout = self.settings.rollout_timeout;
        let state = self
            .call("rollout_status", || {
                gateway.rollout_status("deployment", name, &ns, timeout)
            })
            .await?;
        match state {
            RolloutState::Ready => Ok(()),
            RolloutState::Timeout => Err(FailureCause::RolloutTimeout {
                workload: name.to_string(),
                timeout,
            }),
        }
    }

    /// Delete a workload; already gone counts as deleted.
    pub async fn delete_workload(&self, name: &str) -> Result<(), FailureCause> {
        let gateway = self.gateway;
        let ns = self.namespace();
        match self
            .call("delete", || gateway.delete("deployment", name, &ns))
            .await
        {
            Err(FailureCause::Gateway(e)) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Run the health gate with the strategy's attempts and interval.
    pub async fn gate(&self, name: &str, selector: &str) -> Result<HealthVerdict, FailureCause> {
        let target = GateTarget::deployment(&self.deployment.namespace, name, selector);
        let verdict = self
            .gate
            .await_ready(&target, self.settings.gate_attempts, self.settings.gate_interval)
            .await;
        if verdict.ready {
            Ok(verdict)
        } else {
            Err(FailureCause::HealthGate {
                target: verdict.target,
                attempts: verdict.attempts,
            })
        }
    }

    // ── Time ───────────────────────────────────────────────────────

    /// Sleep, or fail with `Cancelled` if shutdown is signalled first.
    pub async fn sleep_or_cancel(&mut self, duration: Duration) -> Result<(), FailureCause> {
        let deadline = Instant::now() + duration;
        loop {
            if *self.shutdown.borrow_and_update() {
                return Err(FailureCause::Cancelled);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can cancel us now.
                        tokio::time::sleep_until(deadline).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
