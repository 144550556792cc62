//! Signal conditions.
//!
//! Each condition is a side-effect-free read against the cluster that
//! reduces to one number compared with a threshold.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rollguard_cluster::{ClusterGateway, GatewayResult, manifest};
use rollguard_health::{GateTarget, HealthGate};

/// One evaluation of a condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub breached: bool,
    pub value: f64,
    pub threshold: f64,
}

impl Evaluation {
    fn above(value: f64, threshold: f64) -> Self {
        Self {
            breached: value > threshold,
            value,
            threshold,
        }
    }

    fn below(value: f64, threshold: f64) -> Self {
        Self {
            breached: value < threshold,
            value,
            threshold,
        }
    }
}

#[async_trait]
pub trait SignalCondition: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self) -> GatewayResult<Evaluation>;
}

/// Share of replicas failing their health probe.
///
/// No replicas at all counts as every replica failing.
pub struct ErrorRate {
    pub gate: HealthGate,
    pub target: GateTarget,
    pub threshold: f64,
}

#[async_trait]
impl SignalCondition for ErrorRate {
    fn name(&self) -> &'static str {
        "error_rate"
    }

    async fn evaluate(&self) -> GatewayResult<Evaluation> {
        let probes = self.gate.probe_replicas(&self.target).await?;
        let ratio = if probes.is_empty() {
            1.0
        } else {
            let failed = probes.iter().filter(|p| !p.healthy).count();
            failed as f64 / probes.len() as f64
        };
        Ok(Evaluation::above(ratio, self.threshold))
    }
}

/// Share of pods restarted more than `restart_limit` times.
pub struct RestartRatio {
    pub gateway: Arc<dyn ClusterGateway>,
    pub namespace: String,
    pub selector: String,
    pub restart_limit: u32,
    pub threshold: f64,
}

#[async_trait]
impl SignalCondition for RestartRatio {
    fn name(&self) -> &'static str {
        "restart_ratio"
    }

    async fn evaluate(&self) -> GatewayResult<Evaluation> {
        let pods = self
            .gateway
            .list("pod", &self.namespace, Some(&self.selector))
            .await?;
        let ratio = if pods.is_empty() {
            0.0
        } else {
            let restarting = pods
                .iter()
                .filter(|p| manifest::restart_count(p) > self.restart_limit)
                .count();
            restarting as f64 / pods.len() as f64
        };
        Ok(Evaluation::above(ratio, self.threshold))
    }
}

/// Ready share of the worker's desired replicas.
pub struct WorkerAvailability {
    pub gateway: Arc<dyn ClusterGateway>,
    pub namespace: String,
    pub worker: String,
    pub threshold: f64,
}

#[async_trait]
impl SignalCondition for WorkerAvailability {
    fn name(&self) -> &'static str {
        "worker_availability"
    }

    async fn evaluate(&self) -> GatewayResult<Evaluation> {
        let worker = self
            .gateway
            .get("deployment", &self.worker, &self.namespace)
            .await?;
        let (desired, ready) = manifest::replica_counts(&worker);
        // Scaled to zero on purpose: nothing is missing.
        let ratio = if desired == 0 {
            1.0
        } else {
            f64::from(ready) / f64::from(desired)
        };
        Ok(Evaluation::below(ratio, self.threshold))
    }
}

/// Quota/429 log lines per minute across the app's pods.
pub struct QuotaExhaustion {
    pub gateway: Arc<dyn ClusterGateway>,
    pub namespace: String,
    pub selector: String,
    pub pattern: Regex,
    pub lookback: Duration,
    /// Lines per minute.
    pub threshold: f64,
}

#[async_trait]
impl SignalCondition for QuotaExhaustion {
    fn name(&self) -> &'static str {
        "quota_exhaustion"
    }

    async fn evaluate(&self) -> GatewayResult<Evaluation> {
        let pods = self
            .gateway
            .list("pod", &self.namespace, Some(&self.selector))
            .await?;
        let mut matches = 0usize;
        for pod in &pods {
            let Some(name) = manifest::name(pod) else {
                continue;
            };
            let logs = self.gateway.logs(name, &self.namespace, self.lookback).await?;
            matches += logs.lines().filter(|line| self.pattern.is_match(line)).count();
        }
        let minutes = (self.lookback.as_secs_f64() / 60.0).max(1.0 / 60.0);
        Ok(Evaluation::above(matches as f64 / minutes, self.threshold))
    }
}
