//! Bounded-retry readiness gate.

use std::sync::Arc;
use std::time::Duration;

use rollguard_cluster::{ClusterGateway, GatewayResult};
use rollguard_core::HealthVerdict;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::check::{CheckReport, GateSettings, GateTarget, ReplicaProbe, check_once, probe_replicas};

/// Polls a workload until it is ready or attempts run out.
///
/// Invocations share nothing, so independent targets can be gated
/// concurrently from one `HealthGate`.
#[derive(Clone)]
pub struct HealthGate {
    gateway: Arc<dyn ClusterGateway>,
    settings: GateSettings,
}

impl HealthGate {
    pub fn new(gateway: Arc<dyn ClusterGateway>, settings: GateSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Run up to `max_attempts` checks, sleeping `interval` between them.
    ///
    /// Returns on the first passing check. Exhaustion yields
    /// `ready = false` with the latencies of every attempt.
    pub async fn await_ready(
        &self,
        target: &GateTarget,
        max_attempts: u32,
        interval: Duration,
    ) -> HealthVerdict {
        let started = Instant::now();
        let mut latencies = Vec::new();
        let mut attempts = 0;

        while attempts < max_attempts {
            if attempts > 0 {
                tokio::time::sleep(interval).await;
            }
            attempts += 1;

            let report = self.check(target).await;
            latencies.extend(report.latencies.iter().copied());
            if report.ready {
                info!(target = %target.describe(), attempts, "health gate passed");
                return HealthVerdict {
                    target: target.describe(),
                    ready: true,
                    attempts,
                    elapsed: started.elapsed(),
                    sample_latencies: latencies,
                };
            }
            debug!(
                target = %target.describe(),
                attempt = attempts,
                max_attempts,
                reason = report.reason.as_deref().unwrap_or("unknown"),
                "health check not ready"
            );
        }

        warn!(target = %target.describe(), attempts, "health gate exhausted attempts");
        HealthVerdict {
            target: target.describe(),
            ready: false,
            attempts,
            elapsed: started.elapsed(),
            sample_latencies: latencies,
        }
    }

    /// One check, no retry.
    pub async fn check(&self, target: &GateTarget) -> CheckReport {
        check_once(self.gateway.as_ref(), &self.settings, target).await
    }

    /// Probe every replica once and report each result.
    pub async fn probe_replicas(&self, target: &GateTarget) -> GatewayResult<Vec<ReplicaProbe>> {
        probe_replicas(self.gateway.as_ref(), &self.settings, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollguard_cluster::{FakeCluster, deployment_manifest};

    fn setup() -> (Arc<FakeCluster>, HealthGate) {
        let fake = Arc::new(FakeCluster::new());
        fake.seed(deployment_manifest("prod", "api", "api", "api:v2", 2, &[("app", "api")]));
        let gate = HealthGate::new(fake.clone(), GateSettings::default());
        (fake, gate)
    }

    fn target() -> GateTarget {
        GateTarget::deployment("prod", "api", "app=api")
    }

    #[tokio::test(start_paused = true)]
    async fn passes_on_first_attempt() {
        let (_fake, gate) = setup();
        let verdict = gate.await_ready(&target(), 10, Duration::from_secs(10)).await;
        assert!(verdict.ready);
        assert_eq!(verdict.attempts, 1);
        assert_eq!(verdict.elapsed, Duration::ZERO);
        assert_eq!(verdict.sample_latencies.len(), 2);
        assert_eq!(verdict.target, "prod/deployment/api");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_replicas_recover() {
        let (fake, gate) = setup();
        // Two failing rounds of two replicas each, then healthy.
        fake.script_probes("api", [false, false, false, true]);
        let verdict = gate.await_ready(&target(), 10, Duration::from_secs(10)).await;
        assert!(verdict.ready);
        assert_eq!(verdict.attempts, 3);
        assert_eq!(verdict.elapsed, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_a_verdict() {
        let (fake, gate) = setup();
        fake.set_healthy("api", false);
        let verdict = gate.await_ready(&target(), 10, Duration::from_secs(10)).await;
        assert!(!verdict.ready);
        assert_eq!(verdict.attempts, 10);
        assert_eq!(verdict.elapsed, Duration::from_secs(90));
        assert_eq!(fake.probe_count(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_errors_count_as_failed_attempts() {
        let (fake, gate) = setup();
        fake.inject(
            "get",
            [
                rollguard_cluster::GatewayError::Transient("i/o timeout".to_string()),
                rollguard_cluster::GatewayError::Transient("i/o timeout".to_string()),
            ],
        );
        let verdict = gate.await_ready(&target(), 5, Duration::from_secs(1)).await;
        assert!(verdict.ready);
        assert_eq!(verdict.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_is_not_ready() {
        let (fake, gate) = setup();
        let verdict = gate.await_ready(&target(), 0, Duration::from_secs(1)).await;
        assert!(!verdict.ready);
        assert_eq!(verdict.attempts, 0);
        assert_eq!(fake.probe_count(), 0);
    }

    #[tokio::test]
    async fn probes_each_replica() {
        let (fake, gate) = setup();
        fake.script_probes("api", [true, false]);
        let probes = gate.probe_replicas(&target()).await.unwrap();
        assert_eq!(probes.len(), 2);
        assert_eq!(probes.iter().filter(|p| p.healthy).count(), 1);
    }
}
