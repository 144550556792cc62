//! Rollout failures.

use std::time::Duration;

use rollguard_cluster::GatewayError;
use rollguard_state::LeaseError;
use thiserror::Error;

/// Why a phase failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FailureCause {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{workload} did not finish rolling out within {timeout:?}")]
    RolloutTimeout { workload: String, timeout: Duration },

    #[error("{target} not ready after {attempts} health checks")]
    HealthGate { target: String, attempts: u32 },

    #[error("canary check failed: {0}")]
    CanaryCheck(String),

    #[error("cancelled")]
    Cancelled,
}

/// A phase transition that failed; fatal to the deployment.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("phase {phase} failed: {cause}")]
pub struct PhaseFailure {
    pub phase: String,
    #[source]
    pub cause: FailureCause,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RolloutError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Phase(#[from] PhaseFailure),
}
