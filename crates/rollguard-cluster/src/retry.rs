//! Bounded retry of transient gateway errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::GatewayResult;

/// Run `op`, retrying `Transient` errors up to `budget` extra times with a
/// fixed `backoff` between attempts. Permanent errors return immediately.
pub async fn retry_transient<T, F, Fut>(
    operation: &str,
    budget: u32,
    backoff: Duration,
    mut op: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < budget => {
                retries += 1;
                warn!(
                    operation,
                    retry = retries,
                    budget,
                    error = %e,
                    "transient cluster error, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
