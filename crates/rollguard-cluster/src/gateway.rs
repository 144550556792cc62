//! The cluster gateway contract.
//!
//! Calls are awaited to completion by the caller; the caller owns timeouts
//! except where a verb takes one explicitly (`rollout_status`,
//! `probe_http`). Reads have no side effects.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayResult;

/// Outcome of waiting on a workload rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    /// All replicas updated and available.
    Ready,
    /// The wait deadline passed before the rollout finished.
    Timeout,
}

/// Output of a command run inside a pod.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of a single HTTP probe that got a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: u16,
    pub latency: Duration,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Verbs against the cluster control plane and workload endpoints.
///
/// Kinds are lower-case singular resource names (`deployment`, `service`);
/// implementations accept the usual plural and short spellings.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Fetch one object.
    async fn get(&self, kind: &str, name: &str, namespace: &str) -> GatewayResult<Value>;

    /// List objects of a kind, optionally filtered by a label selector.
    async fn list(
        &self,
        kind: &str,
        namespace: &str,
        selector: Option<&str>,
    ) -> GatewayResult<Vec<Value>>;

    /// Create or update an object from a full manifest.
    async fn apply(&self, manifest: &Value) -> GatewayResult<()>;

    /// Apply a JSON merge patch.
    async fn patch(&self, kind: &str, name: &str, namespace: &str, patch: &Value)
    -> GatewayResult<()>;

    /// Point one container of a workload at a new image.
    async fn set_image(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        container: &str,
        image: &str,
    ) -> GatewayResult<()>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> GatewayResult<()>;

    /// Wait for a workload rollout to finish, up to `timeout`.
    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> GatewayResult<RolloutState>;

    /// Revert a workload to its previous revision, or to `revision`.
    async fn rollout_undo(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        revision: Option<u32>,
    ) -> GatewayResult<()>;

    /// Run a command in a pod. A non-zero exit code is not an error.
    async fn exec(&self, pod: &str, namespace: &str, command: &[String]) -> GatewayResult<ExecOutput>;

    /// Fetch a pod's log lines from the last `since`.
    async fn logs(&self, pod: &str, namespace: &str, since: Duration) -> GatewayResult<String>;

    /// GET `url`. Connection failures and timeouts are `Transient` errors;
    /// any response, including non-2xx, is `Ok`.
    async fn probe_http(&self, url: &str, timeout: Duration) -> GatewayResult<ProbeOutcome>;
}
