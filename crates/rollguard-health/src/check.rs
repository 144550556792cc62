//! A single readiness check.
//!
//! Ready means: desired replicas > 0, ready replicas == desired, and every
//! replica answered its health path with 2xx within `max_response_time`.

use std::time::Duration;

use rollguard_cluster::{ClusterGateway, GatewayResult, manifest};
use rollguard_core::RollguardConfig;
use tracing::debug;

/// The workload a gate watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateTarget {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    /// Label selector matching the workload's pods.
    pub selector: String,
}

impl GateTarget {
    pub fn deployment(namespace: &str, name: &str, selector: &str) -> Self {
        Self {
            kind: "deployment".to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        }
    }

    /// `{namespace}/{kind}/{name}`, used in logs and verdicts.
    pub fn describe(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// How replicas are probed.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub probe_path: String,
    pub port: u16,
    pub probe_timeout: Duration,
    pub max_response_time: Duration,
    /// When false only replica counts are checked.
    pub probe_replicas: bool,
}

impl GateSettings {
    pub fn from_config(config: &RollguardConfig) -> Self {
        Self {
            probe_path: config.health.probe_path.clone(),
            port: config.workload.port,
            probe_timeout: config.health.probe_timeout(),
            max_response_time: config.health.max_response_time(),
            probe_replicas: config.health.probe_replicas,
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            probe_path: "/health".to_string(),
            port: 8080,
            probe_timeout: Duration::from_secs(5),
            max_response_time: Duration::from_secs(2),
            probe_replicas: true,
        }
    }
}

/// One replica's probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaProbe {
    pub pod: String,
    pub healthy: bool,
    /// HTTP status, if the replica answered.
    pub status: Option<u16>,
    pub latency: Option<Duration>,
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub ready: bool,
    /// Why the check did not pass.
    pub reason: Option<String>,
    pub latencies: Vec<Duration>,
}

impl CheckReport {
    fn not_ready(reason: impl Into<String>, latencies: Vec<Duration>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
            latencies,
        }
    }
}

/// Probe every pod matching the target's selector.
///
/// A pod without an IP, a connection failure, a non-2xx status, or a
/// response slower than `max_response_time` is unhealthy.
pub async fn probe_replicas(
    gateway: &dyn ClusterGateway,
    settings: &GateSettings,
    target: &GateTarget,
) -> GatewayResult<Vec<ReplicaProbe>> {
    let pods = gateway
        .list("pod", &target.namespace, Some(&target.selector))
        .await?;

    let mut probes = Vec::with_capacity(pods.len());
    for pod in &pods {
        let name = manifest::name(pod).unwrap_or_default().to_string();
        let Some(ip) = manifest::pod_ip(pod) else {
            probes.push(ReplicaProbe {
                pod: name,
                healthy: false,
                status: None,
                latency: None,
            });
            continue;
        };
        let url = format!("http://{ip}:{}{}", settings.port, settings.probe_path);
        let probe = match gateway.probe_http(&url, settings.probe_timeout).await {
            Ok(outcome) => ReplicaProbe {
                pod: name,
                healthy: outcome.is_success() && outcome.latency <= settings.max_response_time,
                status: Some(outcome.status),
                latency: Some(outcome.latency),
            },
            Err(e) => {
                debug!(pod = %name, %url, error = %e, "probe failed");
                ReplicaProbe {
                    pod: name,
                    healthy: false,
                    status: None,
                    latency: None,
                }
            }
        };
        probes.push(probe);
    }
    Ok(probes)
}

/// Run one readiness check. Gateway errors make the check fail.
pub async fn check_once(
    gateway: &dyn ClusterGateway,
    settings: &GateSettings,
    target: &GateTarget,
) -> CheckReport {
    let workload = match gateway
        .get(&target.kind, &target.name, &target.namespace)
        .await
    {
        Ok(w) => w,
        Err(e) => return CheckReport::not_ready(format!("read workload: {e}"), Vec::new()),
    };

    let (desired, ready) = manifest::replica_counts(&workload);
    if desired == 0 {
        return CheckReport::not_ready("workload has no desired replicas", Vec::new());
    }
    if ready != desired {
        return CheckReport::not_ready(format!("{ready}/{desired} replicas ready"), Vec::new());
    }
    if !settings.probe_replicas {
        return CheckReport {
            ready: true,
            reason: None,
            latencies: Vec::new(),
        };
    }

    let probes = match probe_replicas(gateway, settings, target).await {
        Ok(p) => p,
        Err(e) => return CheckReport::not_ready(format!("list pods: {e}"), Vec::new()),
    };
    let latencies: Vec<Duration> = probes.iter().filter_map(|p| p.latency).collect();

    if probes.is_empty() {
        return CheckReport::not_ready("no pods match selector", latencies);
    }
    if let Some(bad) = probes.iter().find(|p| !p.healthy) {
        let reason = match (bad.status, bad.latency) {
            (Some(status), _) if !(200..300).contains(&status) => {
                format!("pod {} returned {status}", bad.pod)
            }
            (Some(_), Some(latency)) => {
                format!("pod {} answered in {latency:?}", bad.pod)
            }
            _ => format!("pod {} unreachable", bad.pod),
        };
        return CheckReport::not_ready(reason, latencies);
    }

    CheckReport {
        ready: true,
        reason: None,
        latencies,
    }
}
