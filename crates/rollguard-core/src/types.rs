//! Domain types shared by every rollguard subsystem.
//!
//! The `Deployment` record is mutated only by the strategy executor; the
//! other types here are immutable values passed between the executor, the
//! trigger monitor, the rollback executor, and reporting.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TargetError;

/// Unique identifier for a deployment run.
pub type DeploymentId = String;

/// Unique identifier for a rollback run.
pub type RollbackId = String;

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Key used to serialize operations on a workload: `{namespace}/{workload}`.
pub fn workload_key(namespace: &str, workload: &str) -> String {
    format!("{namespace}/{workload}")
}

// ── Strategy ───────────────────────────────────────────────────────

/// Rollout algorithm used to move a workload to a new image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Let the orchestrator replace instances in place.
    #[default]
    Rolling,
    /// Stand up the opposite color, gate it, then switch the service.
    BlueGreen,
    /// Run a single canary replica under observation before promoting.
    Canary,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::BlueGreen => "blue-green",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rolling" => Ok(Self::Rolling),
            "blue-green" | "blue_green" | "bluegreen" => Ok(Self::BlueGreen),
            "canary" => Ok(Self::Canary),
            other => Err(TargetError::Strategy(other.to_string())),
        }
    }
}

// ── Deployment ─────────────────────────────────────────────────────

/// Lifecycle of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RolledBack)
    }
}

/// Status of one phase in a deployment's phase log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Completed,
    Failed,
}

/// One entry in a deployment's append-only phase log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub status: PhaseStatus,
    /// Epoch milliseconds.
    pub started_at: u64,
    /// Epoch milliseconds; `None` while the phase is running.
    pub ended_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single rollout of a workload to a new image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub namespace: String,
    pub workload: String,
    pub strategy: StrategyKind,
    pub target_image: String,
    pub worker_image: Option<String>,
    pub phases: Vec<PhaseResult>,
    pub state: DeploymentState,
    /// Epoch milliseconds.
    pub started_at: u64,
    /// Set once a phase has changed the workload that serves traffic.
    /// Decides whether a failure needs reverting.
    pub live_mutated: bool,
}

impl Deployment {
    pub fn new(
        namespace: &str,
        workload: &str,
        strategy: StrategyKind,
        target_image: &str,
        worker_image: Option<&str>,
    ) -> Self {
        Self {
            id: format!("deploy-{}", uuid::Uuid::now_v7().simple()),
            namespace: namespace.to_string(),
            workload: workload.to_string(),
            strategy,
            target_image: target_image.to_string(),
            worker_image: worker_image.map(str::to_string),
            phases: Vec::new(),
            state: DeploymentState::Pending,
            started_at: epoch_millis(),
            live_mutated: false,
        }
    }

    /// The lease key guarding this deployment's workload.
    pub fn lease_key(&self) -> String {
        workload_key(&self.namespace, &self.workload)
    }

    /// Append a `Started` entry and return its index.
    pub fn begin_phase(&mut self, name: &str) -> usize {
        self.phases.push(PhaseResult {
            name: name.to_string(),
            status: PhaseStatus::Started,
            started_at: epoch_millis(),
            ended_at: None,
            error: None,
        });
        self.phases.len() - 1
    }

    /// Close the phase at `index` as completed.
    pub fn complete_phase(&mut self, index: usize) {
        if let Some(phase) = self.phases.get_mut(index) {
            phase.status = PhaseStatus::Completed;
            phase.ended_at = Some(epoch_millis());
        }
    }

    /// Close the phase at `index` as failed.
    pub fn fail_phase(&mut self, index: usize, error: &str) {
        if let Some(phase) = self.phases.get_mut(index) {
            phase.status = PhaseStatus::Failed;
            phase.ended_at = Some(epoch_millis());
            phase.error = Some(error.to_string());
        }
    }

    /// The first failed phase, if any.
    pub fn failed_phase(&self) -> Option<&PhaseResult> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::Failed)
    }
}

// ── Health ─────────────────────────────────────────────────────────

/// Result of one Health Gate invocation. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthVerdict {
    pub target: String,
    pub ready: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    pub sample_latencies: Vec<Duration>,
}

impl HealthVerdict {
    /// Worst probe latency observed, if any probes ran.
    pub fn max_latency(&self) -> Option<Duration> {
        self.sample_latencies.iter().max().copied()
    }
}

// ── Rollback ───────────────────────────────────────────────────────

/// A part of the system that can be reverted independently.
///
/// Variant order is rollback order: dependents before their
/// dependencies, the reverse of install order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Monitoring,
    Application,
    Infrastructure,
    Database,
}

impl Component {
    /// Every component, in rollback order.
    pub const ROLLBACK_ORDER: [Component; 4] = [
        Component::Monitoring,
        Component::Application,
        Component::Infrastructure,
        Component::Database,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monitoring => "monitoring",
            Self::Application => "application",
            Self::Infrastructure => "infrastructure",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monitoring" => Ok(Self::Monitoring),
            "application" | "app" => Ok(Self::Application),
            "infrastructure" | "infra" => Ok(Self::Infrastructure),
            "database" | "db" => Ok(Self::Database),
            other => Err(TargetError::Component(other.to_string())),
        }
    }
}

/// What a rollback reverts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "components", rename_all = "snake_case")]
pub enum RollbackType {
    Application,
    Database,
    Infrastructure,
    Monitoring,
    /// An explicit subset of components.
    Partial(Vec<Component>),
    /// Every component.
    Full,
}

impl RollbackType {
    /// Build a partial rollback from a component list. Rejects an empty list.
    pub fn partial(components: impl IntoIterator<Item = Component>) -> Result<Self, TargetError> {
        let components: Vec<Component> = components.into_iter().collect();
        if components.is_empty() {
            return Err(TargetError::EmptyPartial);
        }
        Ok(Self::Partial(components))
    }

    /// Components to revert, deduplicated, in rollback order.
    pub fn components(&self) -> Vec<Component> {
        match self {
            Self::Application => vec![Component::Application],
            Self::Database => vec![Component::Database],
            Self::Infrastructure => vec![Component::Infrastructure],
            Self::Monitoring => vec![Component::Monitoring],
            Self::Full => Component::ROLLBACK_ORDER.to_vec(),
            Self::Partial(requested) => Component::ROLLBACK_ORDER
                .into_iter()
                .filter(|c| requested.contains(c))
                .collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Database => "database",
            Self::Infrastructure => "infrastructure",
            Self::Monitoring => "monitoring",
            Self::Partial(_) => "partial",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for RollbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partial(components) => {
                let names: Vec<&str> = components.iter().map(Component::as_str).collect();
                write!(f, "partial[{}]", names.join(","))
            }
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for RollbackType {
    type Err = TargetError;

    /// Accepts `application`, `database`, `infrastructure`, `monitoring`,
    /// `full`, or `partial:comp1,comp2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(list) = s.strip_prefix("partial:") {
            let components = list
                .split(',')
                .filter(|c| !c.trim().is_empty())
                .map(Component::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            return Self::partial(components);
        }
        match s.to_ascii_lowercase().as_str() {
            "application" | "app" => Ok(Self::Application),
            "database" | "db" => Ok(Self::Database),
            "infrastructure" | "infra" => Ok(Self::Infrastructure),
            "monitoring" => Ok(Self::Monitoring),
            "full" => Ok(Self::Full),
            "partial" => Err(TargetError::EmptyPartial),
            other => Err(TargetError::RollbackType(other.to_string())),
        }
    }
}

/// Where a rollback goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RollbackTarget {
    /// The revision before the current one.
    Previous,
    /// A specific workload revision or migration version.
    Revision(u32),
    /// A named backup from the backup store.
    Backup(String),
}

/// Whether `name` is usable as a backup name (and a directory name).
pub fn is_valid_backup_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl FromStr for RollbackTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "previous" {
            return Ok(Self::Previous);
        }
        if let Some(rev) = s.strip_prefix("revision:") {
            return match rev.parse::<u32>() {
                Ok(n) if n > 0 => Ok(Self::Revision(n)),
                _ => Err(TargetError::Revision(rev.to_string())),
            };
        }
        if let Some(name) = s.strip_prefix("backup:") {
            if !is_valid_backup_name(name) {
                return Err(TargetError::BackupName(name.to_string()));
            }
            return Ok(Self::Backup(name.to_string()));
        }
        Err(TargetError::Format(s.to_string()))
    }
}

impl fmt::Display for RollbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Previous => f.write_str("previous"),
            Self::Revision(n) => write!(f, "revision:{n}"),
            Self::Backup(name) => write!(f, "backup:{name}"),
        }
    }
}

impl TryFrom<String> for RollbackTarget {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RollbackTarget> for String {
    fn from(value: RollbackTarget) -> Self {
        value.to_string()
    }
}

/// A request to revert one or more components. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub id: RollbackId,
    pub rollback_type: RollbackType,
    pub target: RollbackTarget,
    pub reason: String,
    pub initiated_by: String,
    pub auto_approved: bool,
    /// Epoch milliseconds.
    pub created_at: u64,
}

impl RollbackRequest {
    pub fn new(
        rollback_type: RollbackType,
        target: RollbackTarget,
        reason: &str,
        initiated_by: &str,
        auto_approved: bool,
    ) -> Self {
        Self {
            id: format!("rollback-{}", uuid::Uuid::now_v7().simple()),
            rollback_type,
            target,
            reason: reason.to_string(),
            initiated_by: initiated_by.to_string(),
            auto_approved,
            created_at: epoch_millis(),
        }
    }

    /// The request a trigger emits when its dwell window is exceeded.
    pub fn automatic(signal: &str, reason: &str) -> Self {
        Self::new(
            RollbackType::Full,
            RollbackTarget::Previous,
            reason,
            &format!("trigger:{signal}"),
            true,
        )
    }
}

// ── Backup ─────────────────────────────────────────────────────────

/// Immutable snapshot of cluster objects and config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub path: PathBuf,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub metadata: BTreeMap<String, String>,
}

/// What a backup holds: objects per component plus the migration version.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackupContents {
    pub namespace: String,
    pub objects: BTreeMap<Component, Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_version: Option<u64>,
}

// ── Outcomes ───────────────────────────────────────────────────────

/// Coarse result reported to external reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
}

/// What happened to one component during a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// The component was changed back to the target.
    Reverted,
    /// The component already matched the target; nothing was changed.
    AlreadyAtTarget,
    /// Reversal failed.
    Failed,
}

/// Per-component rollback result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub status: ComponentStatus,
    /// Post-rollback validation; `None` when validation did not run.
    pub validated: Option<bool>,
    pub detail: String,
}

impl ComponentResult {
    pub fn succeeded(&self) -> bool {
        self.status != ComponentStatus::Failed && self.validated != Some(false)
    }
}

/// Structured result of a rollback run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub id: RollbackId,
    pub rollback_type: RollbackType,
    pub target: RollbackTarget,
    pub component_results: BTreeMap<Component, ComponentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_rollback_backup: Option<String>,
    pub status: OutcomeStatus,
    /// Why the run stopped before any component was reverted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RollbackOutcome {
    /// A run that failed before reverting anything.
    pub fn aborted(request: &RollbackRequest, error: &str, duration: Duration) -> Self {
        Self {
            id: request.id.clone(),
            rollback_type: request.rollback_type.clone(),
            target: request.target.clone(),
            component_results: BTreeMap::new(),
            pre_rollback_backup: None,
            status: OutcomeStatus::Failed,
            error: Some(error.to_string()),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Summarize component results into a single status.
    pub fn summarize(results: &BTreeMap<Component, ComponentResult>) -> OutcomeStatus {
        let ok = results.values().filter(|r| r.succeeded()).count();
        if ok == results.len() {
            OutcomeStatus::Success
        } else if ok == 0 {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Partial
        }
    }
}

/// What the rollback-on-failure hook did for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AutoRollback {
    /// The deployment did not fail.
    NotApplicable,
    /// The caller disabled rollback-on-failure.
    Disabled,
    /// The failure happened before the live workload changed.
    NotRequired,
    /// The rollback could not run (lease contention, backup failure, ...).
    Errored { error: String },
    /// The rollback ran; see the outcome.
    Attempted { outcome: Box<RollbackOutcome> },
}

/// Structured result of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub id: DeploymentId,
    pub namespace: String,
    pub workload: String,
    pub strategy: StrategyKind,
    pub phases: Vec<PhaseResult>,
    pub final_state: DeploymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<String>,
    pub rollback: AutoRollback,
    /// Backup taken just before the rollout started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_backup: Option<String>,
    pub duration_ms: u64,
}

impl DeploymentOutcome {
    pub fn from_deployment(deployment: &Deployment, duration: Duration) -> Self {
        Self {
            id: deployment.id.clone(),
            namespace: deployment.namespace.clone(),
            workload: deployment.workload.clone(),
            strategy: deployment.strategy,
            phases: deployment.phases.clone(),
            final_state: deployment.state,
            failed_phase: deployment.failed_phase().map(|p| p.name.clone()),
            rollback: AutoRollback::NotApplicable,
            baseline_backup: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        match self.final_state {
            DeploymentState::Succeeded => OutcomeStatus::Success,
            DeploymentState::RolledBack => OutcomeStatus::Partial,
            _ => OutcomeStatus::Failed,
        }
    }
}
