//! The per-component reversal seam.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rollguard_cluster::{ClusterGateway, GatewayResult, retry_transient};
use rollguard_core::{BackupContents, Component, ComponentStatus};
use rollguard_health::HealthGate;

use crate::error::RevertError;

/// Where one component goes, after the executor resolved the request.
#[derive(Debug, Clone, Copy)]
pub enum RevertTo<'a> {
    /// One step back, as the component defines it.
    Previous,
    /// A workload revision or migration version.
    Revision(u32),
    /// The state captured in a backup.
    Snapshot {
        name: &'a str,
        contents: &'a BackupContents,
    },
}

/// What a successful reversal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reversal {
    pub status: ComponentStatus,
    pub detail: String,
}

impl Reversal {
    pub fn reverted(detail: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Reverted,
            detail: detail.into(),
        }
    }

    pub fn already_at_target(detail: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::AlreadyAtTarget,
            detail: detail.into(),
        }
    }
}

pub struct RevertContext<'a> {
    pub gateway: &'a dyn ClusterGateway,
    pub gate: &'a HealthGate,
    pub namespace: &'a str,
    pub retry_budget: u32,
    pub retry_backoff: Duration,
    pub gate_attempts: u32,
    pub gate_interval: Duration,
}

impl RevertContext<'_> {
    /// Run a gateway call under the transient retry budget.
    pub async fn call<T, F, Fut>(&self, operation: &str, op: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        retry_transient(operation, self.retry_budget, self.retry_backoff, op).await
    }
}

#[async_trait]
pub trait ComponentReverter: Send + Sync {
    fn component(&self) -> Component;

    /// Whether `revision:N` means anything for this component.
    fn accepts_revision(&self) -> bool {
        false
    }

    /// Whether `contents` holds this component's state.
    fn restorable_from(&self, contents: &BackupContents) -> bool {
        contents.objects.contains_key(&self.component())
    }

    /// Record the component's current state into `contents`.
    async fn snapshot(
        &self,
        ctx: &RevertContext<'_>,
        contents: &mut BackupContents,
    ) -> Result<(), RevertError>;

    /// Move the component to `to`. Reaching a target it is already at is
    /// `AlreadyAtTarget`, not an error.
    async fn revert(&self, ctx: &RevertContext<'_>, to: RevertTo<'_>)
    -> Result<Reversal, RevertError>;

    /// Check the component after `revert`.
    async fn validate(&self, ctx: &RevertContext<'_>, to: RevertTo<'_>) -> Result<(), RevertError>;
}
