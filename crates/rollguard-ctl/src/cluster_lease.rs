//! Workload leases stored as `coordination.k8s.io/v1` Lease objects.
//!
//! The key `{namespace}/{workload}` maps to the Lease `rollguard-{workload}`
//! in that namespace. `spec.holderIdentity` names the holder and the
//! `rollguard.io/expires-at` annotation (epoch millis) says when an
//! unrenewed claim lapses. An expired claim may be taken over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rollguard_cluster::{ClusterGateway, GatewayError};
use rollguard_core::epoch_millis;
use rollguard_state::{LeaseBackend, LeaseError};
use serde_json::{Value, json};
use tracing::{debug, info};

pub const EXPIRES_AT: &str = "rollguard.io/expires-at";

pub struct ClusterLeases {
    gateway: Arc<dyn ClusterGateway>,
}

fn split_key(key: &str) -> (&str, &str) {
    key.split_once('/').unwrap_or(("default", key))
}

fn lease_name(workload: &str) -> String {
    format!("rollguard-{workload}")
}

fn backend_err(e: GatewayError) -> LeaseError {
    LeaseError::Backend(e.to_string())
}

fn holder_of(lease: &Value) -> Option<&str> {
    lease.pointer("/spec/holderIdentity").and_then(Value::as_str)
}

fn expires_at(lease: &Value) -> u64 {
    lease
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(EXPIRES_AT))
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

impl ClusterLeases {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    async fn current(&self, namespace: &str, name: &str) -> Result<Option<Value>, LeaseError> {
        match self.gateway.get("lease", name, namespace).await {
            Ok(lease) => Ok(Some(lease)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(backend_err(e)),
        }
    }
}

#[async_trait]
impl LeaseBackend for ClusterLeases {
    async fn claim(&self, key: &str, holder: &str, ttl: Duration) -> Result<(), LeaseError> {
        let (namespace, workload) = split_key(key);
        let name = lease_name(workload);
        let now = epoch_millis();
        let expires = (now + ttl.as_millis() as u64).to_string();

        match self.current(namespace, &name).await? {
            None => {
                let lease = json!({
                    "apiVersion": "coordination.k8s.io/v1",
                    "kind": "Lease",
                    "metadata": {
                        "name": name,
                        "namespace": namespace,
                        "labels": { "app.kubernetes.io/managed-by": "rollguard" },
                        "annotations": { EXPIRES_AT: expires },
                    },
                    "spec": {
                        "holderIdentity": holder,
                        "leaseDurationSeconds": ttl.as_secs(),
                    },
                });
                self.gateway.apply(&lease).await.map_err(backend_err)?;
            }
            Some(lease) => {
                let current = holder_of(&lease).unwrap_or_default();
                if current != holder && !current.is_empty() && expires_at(&lease) > now {
                    return Err(LeaseError::Contention {
                        key: key.to_string(),
                        holder: current.to_string(),
                    });
                }
                if current != holder {
                    info!(%key, %holder, previous = %current, "taking over expired cluster lease");
                }
                let mut patch = json!({
                    "metadata": { "annotations": { EXPIRES_AT: expires } },
                    "spec": {
                        "holderIdentity": holder,
                        "leaseDurationSeconds": ttl.as_secs(),
                    },
                });
                // Conflicts with a concurrent writer fail the patch.
                if let Some(version) = lease.pointer("/metadata/resourceVersion") {
                    patch["metadata"]["resourceVersion"] = version.clone();
                }
                self.gateway
                    .patch("lease", &name, namespace, &patch)
                    .await
                    .map_err(backend_err)?;
            }
        }

        // Last writer wins a race; the loser sees the winner here.
        let stored = self.current(namespace, &name).await?;
        match stored.as_ref().and_then(holder_of) {
            Some(current) if current == holder => {
                debug!(%key, %holder, "cluster lease claimed");
                Ok(())
            }
            Some(current) => Err(LeaseError::Contention {
                key: key.to_string(),
                holder: current.to_string(),
            }),
            None => Err(LeaseError::Backend(format!("lease {name} vanished while claiming"))),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError> {
        let (namespace, workload) = split_key(key);
        let name = lease_name(workload);
        let Some(lease) = self.current(namespace, &name).await? else {
            return Ok(());
        };
        if holder_of(&lease) != Some(holder) {
            debug!(%key, %holder, "cluster lease already moved on");
            return Ok(());
        }
        match self.gateway.delete("lease", &name, namespace).await {
            Ok(()) => {
                debug!(%key, %holder, "cluster lease released");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(backend_err(e)),
        }
    }
}
