//! Error types for configuration loading and rollback target parsing.

use thiserror::Error;

/// Errors raised while loading or validating `rollguard.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while parsing a rollback target or rollback type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("unrecognised rollback target {0:?} (expected previous, revision:N, or backup:NAME)")]
    Format(String),

    #[error("revision must be a positive integer, got {0:?}")]
    Revision(String),

    #[error("invalid backup name {0:?}")]
    BackupName(String),

    #[error("unknown component {0:?}")]
    Component(String),

    #[error("unknown rollback type {0:?}")]
    RollbackType(String),

    #[error("unknown strategy {0:?} (expected rolling, blue-green, or canary)")]
    Strategy(String),

    #[error("partial rollback requires at least one component")]
    EmptyPartial,
}
