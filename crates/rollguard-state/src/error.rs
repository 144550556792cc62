//! Error types for state, backups, and leases.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {0:?} already exists")]
    BackupExists(String),

    #[error("invalid backup name {0:?}")]
    InvalidBackupName(String),

    #[error("backup {name:?} is corrupt: checksum mismatch")]
    Checksum { name: String },
}

/// Failure to take a workload lease.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("workload {key} is held by {holder}")]
    Contention { key: String, holder: String },

    #[error("operation on {expected} presented the lease for {held}")]
    Mismatch { expected: String, held: String },

    #[error("lease storage: {0}")]
    Backend(String),
}
