//! Named workload leases.
//!
//! At most one strategy or rollback run holds the lease for a given
//! `{namespace}/{workload}` key. The returned [`Lease`] releases on drop,
//! so every exit path (including panics and early returns) gives it back.
//!
//! A registry on its own only excludes runs inside this process. With a
//! [`LeaseBackend`] it also claims the key in shared storage, renews the
//! claim while the lease is held, and gives it up on release.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::LeaseError;

/// Shared storage for leases, visible to every rollguard process.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Claim or renew `key` for `holder` for the next `ttl`. A live claim
    /// by anyone else is `Contention`.
    async fn claim(&self, key: &str, holder: &str, ttl: Duration) -> Result<(), LeaseError>;

    /// Give up `key` if `holder` still owns it.
    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError>;
}

#[derive(Clone)]
struct Shared {
    backend: Arc<dyn LeaseBackend>,
    ttl: Duration,
}

#[derive(Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<HashMap<String, String>>>,
    shared: Option<Shared>,
}

/// A backend claim plus the task keeping it alive.
struct Claim {
    backend: Arc<dyn LeaseBackend>,
    renewer: JoinHandle<()>,
}

/// A held lease. Dropping it releases the key.
pub struct Lease {
    key: String,
    holder: String,
    held: Arc<Mutex<HashMap<String, String>>>,
    claim: Option<Claim>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("shared", &self.claim.is_some())
            .finish()
    }
}

impl Lease {
    /// The `{namespace}/{workload}` key this lease guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Who took the lease.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Confirm this lease guards `key`.
    pub fn covers(&self, key: &str) -> Result<(), LeaseError> {
        if self.key == key {
            Ok(())
        } else {
            Err(LeaseError::Mismatch {
                expected: key.to_string(),
                held: self.key.clone(),
            })
        }
    }

    /// Give the lease back, waiting for the shared claim to be dropped.
    pub async fn release(mut self) {
        if let Some(claim) = self.claim.take() {
            claim.renewer.abort();
            if let Err(e) = claim.backend.release(&self.key, &self.holder).await {
                warn!(
                    key = %self.key,
                    holder = %self.holder,
                    error = %e,
                    "shared lease release failed"
                );
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(claim) = self.claim.take() {
            claim.renewer.abort();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let (key, holder) = (self.key.clone(), self.holder.clone());
                    handle.spawn(async move {
                        if let Err(e) = claim.backend.release(&key, &holder).await {
                            warn!(%key, %holder, error = %e, "shared lease release failed");
                        }
                    });
                }
                Err(_) => {
                    warn!(key = %self.key, "no runtime to release shared lease; it will expire")
                }
            }
        }
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.get(&self.key) == Some(&self.holder) {
            held.remove(&self.key);
            info!(key = %self.key, holder = %self.holder, "lease released");
        }
    }
}

impl LeaseRegistry {
    /// A registry that only excludes runs in this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that also claims every key in `backend`, renewing the
    /// claim every third of `ttl`.
    pub fn with_backend(backend: Arc<dyn LeaseBackend>, ttl: Duration) -> Self {
        Self {
            held: Arc::default(),
            shared: Some(Shared { backend, ttl }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the lease if it is free. Registries with a backend must go
    /// through [`LeaseRegistry::acquire`].
    pub fn try_acquire(&self, key: &str, holder: &str) -> Result<Lease, LeaseError> {
        if self.shared.is_some() {
            return Err(LeaseError::Backend(format!(
                "{key} is shared; acquire it asynchronously"
            )));
        }
        self.claim_local(key, holder)
    }

    fn claim_local(&self, key: &str, holder: &str) -> Result<Lease, LeaseError> {
        let mut held = self.lock();
        if let Some(current) = held.get(key) {
            return Err(LeaseError::Contention {
                key: key.to_string(),
                holder: current.clone(),
            });
        }
        held.insert(key.to_string(), holder.to_string());
        info!(%key, %holder, "lease acquired");
        Ok(Lease {
            key: key.to_string(),
            holder: holder.to_string(),
            held: self.held.clone(),
            claim: None,
        })
    }

    /// Local claim, then the backend claim. A refused backend claim drops
    /// the local one again.
    async fn claim(&self, key: &str, holder: &str) -> Result<Lease, LeaseError> {
        let mut lease = self.claim_local(key, holder)?;
        if let Some(shared) = &self.shared {
            shared.backend.claim(key, holder, shared.ttl).await?;
            lease.claim = Some(Claim {
                backend: shared.backend.clone(),
                renewer: tokio::spawn(renew(shared.clone(), key.to_string(), holder.to_string())),
            });
        }
        Ok(lease)
    }

    /// Take the lease, retrying contention up to `attempts` times with a
    /// fixed `backoff` between tries.
    pub async fn acquire(
        &self,
        key: &str,
        holder: &str,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Lease, LeaseError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.claim(key, holder).await {
                Ok(lease) => return Ok(lease),
                Err(e) if attempt >= attempts => {
                    warn!(%key, %holder, attempts, "lease contention, giving up");
                    return Err(e);
                }
                Err(LeaseError::Contention { holder: current, .. }) => {
                    debug!(%key, %holder, %current, attempt, "lease busy, backing off");
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Who holds `key` in this process, if anyone.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }
}

async fn renew(shared: Shared, key: String, holder: String) {
    let period = (shared.ttl / 3).max(Duration::from_secs(1));
    loop {
        tokio::time::sleep(period).await;
        match shared.backend.claim(&key, &holder, shared.ttl).await {
            Ok(()) => debug!(%key, %holder, "shared lease renewed"),
            Err(e @ LeaseError::Contention { .. }) => {
                warn!(%key, %holder, error = %e, "shared lease lost");
                return;
            }
            Err(e) => warn!(%key, %holder, error = %e, "shared lease renewal failed"),
        }
    }
}
