//! Strategy executor: entry point for one deployment run.

use std::sync::Arc;

use rollguard_cluster::ClusterGateway;
use rollguard_core::{Deployment, DeploymentState};
use rollguard_health::HealthGate;
use rollguard_state::Lease;
use tokio::sync::watch;
use tracing::{error, info};

use crate::context::RolloutContext;
use crate::error::RolloutError;
use crate::strategy::{StrategySettings, driver_for};

/// Runs deployments against one cluster with fixed settings.
pub struct StrategyExecutor {
    gateway: Arc<dyn ClusterGateway>,
    gate: HealthGate,
    settings: StrategySettings,
}

impl StrategyExecutor {
    /// An executor whose drivers talk to `gateway` and gate candidates
    /// with `gate`.
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        gate: HealthGate,
        settings: StrategySettings,
    ) -> Self {
        Self {
            gateway,
            gate,
            settings,
        }
    }

    /// Workload names, selectors and timings used by every run.
    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// Drive `deployment` to a terminal state with its strategy.
    ///
    /// The caller must hold the workload's lease. On return the deployment
    /// is `Succeeded` or `Failed` and its phase log says how far it got.
    /// A wrong lease is refused before anything runs.
    pub async fn run(
        &self,
        deployment: &mut Deployment,
        lease: &Lease,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), RolloutError> {
        lease.covers(&deployment.lease_key())?;

        let driver = driver_for(deployment.strategy);
        deployment.state = DeploymentState::Running;
        info!(
            deployment = %deployment.id,
            workload = %deployment.lease_key(),
            strategy = %deployment.strategy,
            image = %deployment.target_image,
            "deployment started"
        );

        let result = {
            let mut ctx = RolloutContext::new(
                self.gateway.as_ref(),
                &self.gate,
                &self.settings,
                deployment,
                shutdown,
            );
            driver.drive(&mut ctx).await
        };

        match result {
            Ok(()) => {
                deployment.state = DeploymentState::Succeeded;
                info!(deployment = %deployment.id, "deployment succeeded");
                Ok(())
            }
            Err(failure) => {
                deployment.state = DeploymentState::Failed;
                error!(
                    deployment = %deployment.id,
                    phase = %failure.phase,
                    error = %failure.cause,
                    live_mutated = deployment.live_mutated,
                    "deployment failed"
                );
                Err(failure.into())
            }
        }
    }
}
