//! HTTP health probe.
//!
//! A probe is a single GET against a configured URL. Any 2xx is healthy;
//! other statuses are unhealthy; connection errors and timeouts fail.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use tracing::debug;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not complete (bad URL, connection error, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        *self == ProbeResult::Healthy
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeResult::Healthy => "healthy",
            ProbeResult::Unhealthy => "unhealthy",
            ProbeResult::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GET `url` and classify the response within `timeout`.
///
/// Only `http://` URLs are probed; anything else is `Failed`.
pub async fn http_probe(url: &str, timeout: Duration) -> ProbeResult {
    let uri: http::Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => {
            debug!(error = %e, %url, "health probe url invalid");
            return ProbeResult::Failed;
        }
    };
    if uri.scheme_str() != Some("http") {
        debug!(%url, "health probe supports plain http only");
        return ProbeResult::Failed;
    }
    let Some(host) = uri.host().map(str::to_string) else {
        debug!(%url, "health probe url has no host");
        return ProbeResult::Failed;
    };
    let address = format!("{host}:{}", uri.port_u16().unwrap_or(80));
    let target = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(&address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %url, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %url, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(target.as_str())
            .header("host", &host)
            .header("user-agent", "autopilot-health/0.1")
            .body(Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %url, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %url, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %url, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%url, ?timeout, "health probe timed out");
        ProbeResult::Failed
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `status_line` to every connection; returns the base URL.
    pub(crate) async fn serve_status(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn ok_response_is_healthy() {
        let base = serve_status("200 OK").await;
        let result = http_probe(&format!("{base}/healthz"), Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn server_error_is_unhealthy() {
        let base = serve_status("503 Service Unavailable").await;
        let result = http_probe(&format!("{base}/healthz"), Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Unhealthy);
    }

    #[tokio::test]
    async fn closed_port_fails() {
        let result = http_probe("http://127.0.0.1:1/healthz", Duration::from_millis(500)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let result = http_probe(&format!("http://{addr}/"), Duration::from_millis(200)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn https_is_not_probed() {
        let result = http_probe("https://example.com/healthz", Duration::from_secs(1)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[test]
    fn only_healthy_is_healthy() {
        assert!(ProbeResult::Healthy.is_healthy());
        assert!(!ProbeResult::Unhealthy.is_healthy());
        assert!(!ProbeResult::Failed.is_healthy());
    }
}
