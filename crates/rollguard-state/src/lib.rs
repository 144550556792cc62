//! rollguard-state: persistence and mutual exclusion.
//!
//! - **`store`**: redb-backed history of deployment and rollback outcomes,
//!   plus the backup index
//! - **`backup`**: append-only backup store; payloads are written to a
//!   temp file and renamed into place before being registered, so readers
//!   never see a partial backup
//! - **`lease`**: named locks keyed by `{namespace}/{workload}`, held in
//!   process and optionally claimed in a shared [`LeaseBackend`]
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod backup;
pub mod error;
pub mod lease;
pub mod store;
pub mod tables;

pub use backup::{BackupPurpose, BackupStore};
pub use error::{LeaseError, StateError, StateResult};
pub use lease::{Lease, LeaseBackend, LeaseRegistry};
pub use store::{HistoryEntry, StateStore};
