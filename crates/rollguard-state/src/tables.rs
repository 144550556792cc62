//! redb table definitions.
//!
//! Values are JSON. History keys are `{recorded_at:020}:{id}` so a plain
//! key scan is chronological.

use redb::TableDefinition;

/// Every table maps string keys to JSON bytes.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Deployment outcomes keyed by `{recorded_at:020}:{id}`.
pub const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");

/// Rollback outcomes keyed by `{recorded_at:020}:{id}`.
pub const ROLLBACKS: JsonTable = TableDefinition::new("rollbacks");

/// Published backups keyed by name.
pub const BACKUPS: JsonTable = TableDefinition::new("backups");

/// Zero-padded chronological key.
pub fn history_key(recorded_at: u64, id: &str) -> String {
    format!("{recorded_at:020}:{id}")
}
