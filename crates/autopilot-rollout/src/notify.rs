//! Deployment notifications: structured events posted to a webhook.
//!
//! Delivery is best-effort: failures are logged and never surface to
//! the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use autopilot_core::{BoxFuture, DeploymentId, Environment};

/// Lifecycle point a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Success,
    Rollback,
}

/// Payload posted to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub deployment_id: DeploymentId,
    pub environment: Environment,
    pub status: EventStatus,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Base URL of the environment.
    pub url: String,
}

/// Receives deployment events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: DeploymentEvent) -> BoxFuture<'_, ()>;
}

/// Posts events as JSON to the webhook configured for their environment.
pub struct WebhookNotifier {
    endpoints: BTreeMap<Environment, String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(endpoints: BTreeMap<Environment, String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: DeploymentEvent) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let Some(url) = self.endpoints.get(&event.environment) else {
                debug!(environment = %event.environment, "no webhook configured, event dropped");
                return;
            };

            let body = match serde_json::to_vec(&event) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to encode deployment event");
                    return;
                }
            };

            match post_json(url, body, self.timeout).await {
                Ok(()) => debug!(
                    deployment_id = %event.deployment_id,
                    status = ?event.status,
                    "deployment event delivered"
                ),
                Err(e) => warn!(
                    deployment_id = %event.deployment_id,
                    status = ?event.status,
                    %url,
                    error = %e,
                    "deployment event delivery failed"
                ),
            }
        })
    }
}

/// POST a JSON body over plain HTTP/1.1, failing on non-2xx or timeout.
pub async fn post_json(url: &str, body: Vec<u8>, timeout: Duration) -> anyhow::Result<()> {
    let uri: http::Uri = url.parse()?;
    if uri.scheme_str() != Some("http") {
        anyhow::bail!("unsupported webhook scheme in {url}");
    }
    let host = uri
        .host()
        .ok_or_else(|| anyhow::anyhow!("webhook url has no host: {url}"))?
        .to_string();
    let address = format!("{host}:{}", uri.port_u16().unwrap_or(80));
    let target = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let send = async {
        let stream = tokio::net::TcpStream::connect(&address).await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(target.as_str())
            .header("host", &host)
            .header("content-type", "application/json")
            .header("user-agent", "autopilot/0.1")
            .body(Full::new(Bytes::from(body)))?;

        let resp = sender.send_request(req).await?;
        if !resp.status().is_success() {
            anyhow::bail!("webhook returned {}", resp.status());
        }
        Ok::<(), anyhow::Error>(())
    };

    match tokio::time::timeout(timeout, send).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("webhook timed out after {timeout:?}"),
    }
}
