//! rollguard-rollback: the rollback executor.
//!
//! A [`RollbackRequest`](rollguard_core::RollbackRequest) is validated,
//! the current state is backed up, production requests that were not
//! auto-approved are confirmed by an operator, and then each component is
//! reverted and validated in rollback order:
//!
//! ```text
//! monitoring → application → infrastructure → database
//! ```
//!
//! A component that fails to revert or validate is recorded and the
//! remaining components still run. The result is a per-component map,
//! never a single pass/fail.

pub mod application;
pub mod confirm;
pub mod database;
pub mod error;
pub mod executor;
pub mod objects;
pub mod reverter;

pub use application::ApplicationReverter;
pub use confirm::{Confirmer, FixedAnswer};
pub use database::DatabaseReverter;
pub use error::{RevertError, RollbackError, RollbackResult};
pub use executor::{RollbackExecutor, RollbackPolicy};
pub use objects::ObjectReverter;
pub use reverter::{ComponentReverter, RevertContext, RevertTo, Reversal};
