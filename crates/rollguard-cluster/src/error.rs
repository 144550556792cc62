//! Gateway error taxonomy.

use thiserror::Error;

/// Result type alias for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A failed cluster or network call.
///
/// Only `Transient` is safe to retry; every other variant is permanent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transient cluster error: {0}")]
    Transient(String),

    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("access denied: {0}")]
    AuthDenied(String),

    #[error("cluster error: {0}")]
    Permanent(String),
}

impl GatewayError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "i/o timeout",
    "tls handshake timeout",
    "the server is currently unable",
    "context deadline exceeded",
    "unexpected eof",
    "no route to host",
    "too many requests",
    "etcdserver: request timed out",
    "serviceunavailable",
];

/// Classify a failed `kubectl` invocation from its stderr.
///
/// Unrecognised failures are permanent: retrying an unknown error is more
/// likely to repeat a bad mutation than to recover.
pub fn classify_failure(stderr: &str, kind: &str, name: &str) -> GatewayError {
    let lower = stderr.to_ascii_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("(notfound)")
        || lower.contains(" not found")
        || lower.contains("could not find the requested resource")
    {
        return GatewayError::not_found(kind, name);
    }
    if lower.contains("forbidden") || lower.contains("unauthorized") {
        return GatewayError::AuthDenied(message);
    }
    if lower.contains("is invalid")
        || lower.contains("error validating")
        || lower.contains("error parsing")
        || lower.contains("unable to decode")
    {
        return GatewayError::InvalidManifest(message);
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return GatewayError::Transient(message);
    }
    GatewayError::Permanent(message)
}
