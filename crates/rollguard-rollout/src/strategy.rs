//! Rollout strategies and their settings.

use std::time::Duration;

use async_trait::async_trait;
use rollguard_core::{RollguardConfig, StrategyKind};

use crate::blue_green::BlueGreen;
use crate::canary::Canary;
use crate::context::RolloutContext;
use crate::error::PhaseFailure;
use crate::rolling::Rolling;

/// Everything a driver needs to know about the workload and timings.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub app: String,
    pub app_container: String,
    pub worker: Option<String>,
    pub worker_container: Option<String>,
    /// Selector matching the app's primary pods, e.g. `app=api,track!=canary`.
    pub app_selector: String,
    /// Selector matching only the canary's pods.
    pub canary_selector: String,

    pub rollout_timeout: Duration,
    /// Extra attempts for transient gateway errors, per call.
    pub retry_budget: u32,
    pub retry_backoff: Duration,

    pub gate_attempts: u32,
    pub gate_interval: Duration,

    /// Service whose selector carries the live color.
    pub service: String,
    pub drain_delay: Duration,

    pub canary_duration: Duration,
    pub canary_interval: Duration,
    pub canary_replicas: u32,
}

impl StrategySettings {
    pub fn from_config(config: &RollguardConfig) -> Self {
        let app = config.workload.app.clone();
        Self {
            app_container: config.workload.container_name().to_string(),
            worker: config.workload.worker.clone(),
            worker_container: config.workload.worker_container_name().map(str::to_string),
            app_selector: config.app_selector(),
            canary_selector: config.canary_selector(),
            rollout_timeout: config.rollout.rollout_timeout(),
            retry_budget: config.rollout.retry_budget,
            retry_backoff: config.rollout.retry_backoff(),
            gate_attempts: config.health.max_attempts,
            gate_interval: config.health.interval(),
            service: config.blue_green.service.clone().unwrap_or_else(|| app.clone()),
            drain_delay: config.blue_green.drain_delay(),
            canary_duration: config.canary.duration(),
            canary_interval: config.canary.interval(),
            canary_replicas: config.canary.replicas,
            app,
        }
    }

    /// Settings for a bare app with the given name and default timings.
    pub fn for_app(app: &str) -> Self {
        Self {
            app: app.to_string(),
            app_container: app.to_string(),
            worker: None,
            worker_container: None,
            app_selector: format!("app={app},track!=canary"),
            canary_selector: format!("app={app},track=canary"),
            rollout_timeout: Duration::from_secs(300),
            retry_budget: 3,
            retry_backoff: Duration::from_secs(2),
            gate_attempts: 10,
            gate_interval: Duration::from_secs(10),
            service: app.to_string(),
            drain_delay: Duration::from_secs(30),
            canary_duration: Duration::from_secs(300),
            canary_interval: Duration::from_secs(30),
            canary_replicas: 1,
        }
    }
}

/// One rollout algorithm.
///
/// A driver records its phases on the context's deployment and returns the
/// first failure. It never sets the deployment's terminal state; the
/// executor does.
#[async_trait]
pub trait RolloutDriver: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn drive(&self, ctx: &mut RolloutContext<'_>) -> Result<(), PhaseFailure>;
}

pub fn driver_for(kind: StrategyKind) -> Box<dyn RolloutDriver> {
    match kind {
        StrategyKind::Rolling => Box::new(Rolling),
        StrategyKind::BlueGreen => Box::new(BlueGreen),
        StrategyKind::Canary => Box::new(Canary),
    }
}
