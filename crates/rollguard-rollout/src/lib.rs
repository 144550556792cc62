//! rollguard-rollout: the strategy executor.
//!
//! Drives one deployment through a rolling, blue-green, or canary rollout,
//! recording each phase in the deployment's phase log. Every cluster call
//! goes through the gateway with transient errors retried up to the
//! strategy's budget; readiness decisions go through the health gate.
//!
//! # Components
//!
//! - **`strategy`**: per-strategy settings and the `RolloutDriver` trait
//! - **`context`**: phase bookkeeping, retried calls, cancellable sleeps
//! - **`rolling`**, **`blue_green`**, **`canary`**: the three drivers
//! - **`executor`**: entry point; checks the lease and dispatches
//!
//! # Safety
//!
//! Blue-green switches traffic only after its candidate passes the health
//! gate. Canary observation aborts on the first failed check.

pub mod blue_green;
pub mod canary;
pub mod context;
pub mod error;
pub mod executor;
pub mod rolling;
pub mod strategy;

pub use context::RolloutContext;
pub use error::{FailureCause, PhaseFailure, RolloutError};
pub use executor::StrategyExecutor;
pub use strategy::{RolloutDriver, StrategySettings, driver_for};
