//! rollguard-core: shared domain types and configuration.
//!
//! Everything the rollout, trigger, and rollback crates exchange lives
//! here: the `Deployment` record and its phase log, rollback requests and
//! targets, backups, and the structured outcomes handed to reporting.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::RollguardConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, TargetError};
pub use types::*;
