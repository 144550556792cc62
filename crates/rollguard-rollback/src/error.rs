//! Rollback errors.
//!
//! `RollbackError` stops a run before any component is touched.
//! `RevertError` is scoped to one component and ends up in that
//! component's result.

use rollguard_cluster::GatewayError;
use rollguard_core::Component;
use rollguard_state::{LeaseError, StateError};
use thiserror::Error;

pub type RollbackResult<T> = Result<T, RollbackError>;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("invalid rollback target: {0}")]
    InvalidTarget(String),

    #[error("backup {0:?} not found")]
    BackupNotFound(String),

    #[error("could not snapshot {component}: {reason}")]
    Snapshot { component: Component, reason: String },

    #[error("rollback not confirmed by operator")]
    NotConfirmed,

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum RevertError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The target cannot be reached for this component.
    #[error("{0}")]
    Target(String),

    #[error("command {command:?} failed: {detail}")]
    Command { command: String, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),
}
