//! HTTP probe against workload endpoints.
//!
//! Opens a plain TCP connection, performs an HTTP/1.1 handshake with hyper,
//! and issues a single GET. The whole exchange is bounded by `timeout`.

use std::time::{Duration, Instant};

use http::Uri;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ProbeOutcome;

/// GET `url` and report the status code and latency.
///
/// Returns `Transient` if the connection fails, the handshake fails, or the
/// deadline passes; a response of any status is `Ok`.
pub async fn http_probe(url: &str, timeout: Duration) -> GatewayResult<ProbeOutcome> {
    let uri: Uri = url
        .parse()
        .map_err(|e| GatewayError::Permanent(format!("invalid probe url {url:?}: {e}")))?;
    let host = uri
        .host()
        .ok_or_else(|| GatewayError::Permanent(format!("probe url {url:?} has no host")))?
        .to_string();
    let port = uri.port_u16().unwrap_or(80);
    let address = format!("{host}:{port}");
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let started = Instant::now();

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(&address).await.map_err(|e| {
            debug!(error = %e, %url, "probe connection failed");
            GatewayError::Transient(format!("connect {address}: {e}"))
        })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.map_err(|e| {
            debug!(error = %e, %url, "probe handshake failed");
            GatewayError::Transient(format!("handshake {address}: {e}"))
        })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&path)
            .header("host", &address)
            .header("user-agent", "rollguard-probe/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| GatewayError::Permanent(format!("build probe request: {e}")))?;

        let resp = sender.send_request(req).await.map_err(|e| {
            debug!(error = %e, %url, "probe request failed");
            GatewayError::Transient(format!("request {url}: {e}"))
        })?;

        Ok::<u16, GatewayError>(resp.status().as_u16())
    })
    .await;

    match result {
        Ok(Ok(status)) => {
            let latency = started.elapsed();
            if !(200..300).contains(&status) {
                debug!(status, %url, "probe non-2xx");
            }
            Ok(ProbeOutcome { status, latency })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            debug!(%url, "probe timed out");
            Err(GatewayError::Transient(format!(
                "probe {url} timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}
