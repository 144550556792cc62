//! StateStore: redb-backed outcome history and backup index.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use rollguard_core::{Backup, DeploymentOutcome, RollbackOutcome, epoch_millis};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// One row of `rollguard history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Deployment {
        recorded_at: u64,
        outcome: DeploymentOutcome,
    },
    Rollback {
        recorded_at: u64,
        outcome: RollbackOutcome,
    },
}

impl HistoryEntry {
    pub fn recorded_at(&self) -> u64 {
        match self {
            Self::Deployment { recorded_at, .. } | Self::Rollback { recorded_at, .. } => {
                *recorded_at
            }
        }
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
        txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: Serialize>(
        &self,
        table: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Every row of a table in key order, with its key.
    fn scan<T: DeserializeOwned>(
        &self,
        table: JsonTable,
    ) -> StateResult<Vec<(String, T)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), item));
        }
        Ok(results)
    }

    // ── History ────────────────────────────────────────────────────

    pub fn record_deployment(&self, outcome: &DeploymentOutcome) -> StateResult<()> {
        let key = history_key(epoch_millis(), &outcome.id);
        self.put(DEPLOYMENTS, &key, outcome)?;
        debug!(%key, "deployment outcome recorded");
        Ok(())
    }

    pub fn record_rollback(&self, outcome: &RollbackOutcome) -> StateResult<()> {
        let key = history_key(epoch_millis(), &outcome.id);
        self.put(ROLLBACKS, &key, outcome)?;
        debug!(%key, "rollback outcome recorded");
        Ok(())
    }

    /// Deployment and rollback outcomes, newest first, at most `limit`.
    pub fn history(&self, limit: usize) -> StateResult<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = Vec::new();
        for (key, outcome) in self.scan::<DeploymentOutcome>(DEPLOYMENTS)? {
            entries.push(HistoryEntry::Deployment {
                recorded_at: recorded_at(&key),
                outcome,
            });
        }
        for (key, outcome) in self.scan::<RollbackOutcome>(ROLLBACKS)? {
            entries.push(HistoryEntry::Rollback {
                recorded_at: recorded_at(&key),
                outcome,
            });
        }
        entries.sort_by_key(|e| std::cmp::Reverse(e.recorded_at()));
        entries.truncate(limit);
        Ok(entries)
    }

    // ── Backup index ───────────────────────────────────────────────

    /// Register a published backup. Fails if the name is taken.
    pub fn insert_backup(&self, backup: &Backup) -> StateResult<()> {
        let value = serde_json::to_vec(backup).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
            let exists = table
                .get(backup.id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                return Err(StateError::BackupExists(backup.id.clone()));
            }
            table
                .insert(backup.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(backup = %backup.id, "backup registered");
        Ok(())
    }

    pub fn get_backup(&self, name: &str) -> StateResult<Option<Backup>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let backup: Backup =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(backup))
            }
            None => Ok(None),
        }
    }

    /// All registered backups, newest first.
    pub fn list_backups(&self) -> StateResult<Vec<Backup>> {
        let mut backups: Vec<Backup> = self
            .scan::<Backup>(BACKUPS)?
            .into_iter()
            .map(|(_, b)| b)
            .collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(backups)
    }
}

fn recorded_at(key: &str) -> u64 {
    key.split(':').next().and_then(|t| t.parse().ok()).unwrap_or(0)
}
