//! rollguard-ctl: the `rollguard` binary's engine room.
//!
//! Wires the strategy executor, trigger monitor, and rollback executor
//! together behind the workload lease:
//!
//! ```text
//! deploy ──► preflight (JoinSet) ──► lease ──► baseline backup ──► StrategyExecutor::run
//!                                               │ failed + live mutated
//!                                               └─► RollbackExecutor::run (same lease)
//!        └─ --monitor ──► TriggerMonitor::run ──► Triggered ──► lease ──► RollbackExecutor::run
//! ```
//!
//! Every outcome is recorded in the history store before it is returned.

pub mod cluster_lease;
pub mod confirm;
pub mod orchestrator;
pub mod preflight;
pub mod report;

pub use confirm::StdinConfirmer;
pub use orchestrator::{
    DeployReport, DeployRequest, MonitorReport, Orchestrator, OrchestratorError,
};
pub use preflight::{PreflightError, Preflight};
pub use report::OutputFormat;
