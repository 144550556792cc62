//! Pre-deployment checks.
//!
//! The checks are independent, so they run as parallel tasks on a
//! `JoinSet` and are joined before deciding. Every failure is reported,
//! not just the first.

use std::sync::Arc;

use regex::Regex;
use rollguard_cluster::ClusterGateway;
use rollguard_state::BackupStore;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// `[registry[:port]/]path[:tag][@sha256:digest]`, lowercase path.
const IMAGE_REFERENCE: &str = r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?::[0-9]+)?(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?(?:@sha256:[a-f0-9]{64})?$";

#[derive(Debug, Error)]
#[error("preflight failed: {}", .failures.join("; "))]
pub struct PreflightError {
    pub failures: Vec<String>,
}

/// Whether `image` is a well-formed image reference.
pub fn valid_image(image: &str) -> Result<bool, regex::Error> {
    Ok(Regex::new(IMAGE_REFERENCE)?.is_match(image))
}

pub struct Preflight {
    gateway: Arc<dyn ClusterGateway>,
    backups: BackupStore,
    namespace: String,
    app_selector: String,
}

impl Preflight {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        backups: BackupStore,
        namespace: &str,
        app_selector: &str,
    ) -> Self {
        Self {
            gateway,
            backups,
            namespace: namespace.to_string(),
            app_selector: app_selector.to_string(),
        }
    }

    /// Run every check and wait for all of them.
    pub async fn run(&self, images: &[String]) -> Result<(), PreflightError> {
        let mut join_set: JoinSet<(&'static str, Result<(), String>)> = JoinSet::new();

        let gateway = self.gateway.clone();
        let namespace = self.namespace.clone();
        join_set.spawn(async move {
            let result = gateway
                .list("deployment", &namespace, None)
                .await
                .map(|_| ())
                .map_err(|e| format!("namespace {namespace} unreachable: {e}"));
            ("cluster", result)
        });

        let gateway = self.gateway.clone();
        let namespace = self.namespace.clone();
        let selector = self.app_selector.clone();
        join_set.spawn(async move {
            let result = match gateway.list("deployment", &namespace, Some(&selector)).await {
                Ok(found) if found.is_empty() => Err(format!(
                    "no live workload matches {selector} in {namespace}"
                )),
                Ok(_) => Ok(()),
                Err(e) => Err(format!("could not look up workload: {e}")),
            };
            ("workload", result)
        });

        let images = images.to_vec();
        join_set.spawn(async move {
            let mut bad = Vec::new();
            for image in &images {
                match valid_image(image) {
                    Ok(true) => {}
                    Ok(false) => bad.push(image.clone()),
                    Err(e) => return ("image", Err(e.to_string())),
                }
            }
            let result = if bad.is_empty() {
                Ok(())
            } else {
                Err(format!("malformed image reference: {}", bad.join(", ")))
            };
            ("image", result)
        });

        let backups = self.backups.clone();
        join_set.spawn(async move {
            let result = match tokio::task::spawn_blocking(move || backups.check_writable()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("backup store not writable: {e}")),
                Err(e) => Err(format!("backup store check panicked: {e}")),
            };
            ("backups", result)
        });

        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((check, Ok(()))) => debug!(%check, "preflight check passed"),
                Ok((check, Err(reason))) => {
                    warn!(%check, %reason, "preflight check failed");
                    failures.push(reason);
                }
                Err(e) => failures.push(format!("preflight task failed: {e}")),
            }
        }

        if failures.is_empty() {
            info!(namespace = %self.namespace, "preflight passed");
            Ok(())
        } else {
            failures.sort();
            Err(PreflightError { failures })
        }
    }
}
