//! Liveness probing.
//!
//! # Responsibilities
//! - Define the probe wire contract (request names a service, response says
//!   whether the instance serves it)
//! - Issue one liveness call per attempt with a deadline
//! - Retry with a fixed delay up to the attempt budget
//!
//! # Design Decisions
//! - No exponential backoff: fixed delay between attempts
//! - A timeout, a transport error and `ok = false` all count as a failed attempt

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::HealthConfig;
use crate::discovery::{within, DiscoveryError, Node, Result};
use crate::observability::metrics;

/// Path served by [`crate::health::HealthReporter`].
pub const PING_PATH: &str = "/health/ping";

const MAX_PING_RESPONSE_BYTES: usize = 4096;

/// Probe request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub ping_service: String,
}

/// Probe response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PingResponse {
    pub ok: bool,
}

/// One liveness call against a node.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns whether `node` recognizes `service`.
    async fn ping(&self, service: &str, node: &Node) -> Result<bool>;
}

/// Prober speaking the JSON-over-HTTP ping contract.
pub struct HttpProber {
    client: Client<HttpConnector, Body>,
}

impl HttpProber {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn ping(&self, service: &str, node: &Node) -> Result<bool> {
        let payload = serde_json::to_vec(&PingRequest {
            ping_service: service.to_string(),
        })?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}{}", node.address(), PING_PATH))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "rpc-discovery-health-check")
            .body(Body::from(payload))
            .map_err(|e| DiscoveryError::Configuration(format!("bad probe request: {}", e)))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| DiscoveryError::ProbeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DiscoveryError::ProbeFailed(format!(
                "non-success status {}",
                response.status()
            )));
        }

        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_PING_RESPONSE_BYTES)
            .await
            .map_err(|e| DiscoveryError::ProbeFailed(e.to_string()))?;
        let body: PingResponse = serde_json::from_slice(&bytes)?;
        Ok(body.ok)
    }
}

/// Attempt budget for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(5),
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&HealthConfig> for RetryPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            timeout: Duration::from_millis(config.probe_timeout_ms),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Probe until one attempt succeeds or the budget runs out.
///
/// Returns the 1-based attempt that succeeded, or `None` if every attempt failed.
pub async fn probe_with_retry(
    prober: &dyn Prober,
    policy: &RetryPolicy,
    service: &str,
    node: &Node,
) -> Option<u32> {
    for attempt in 1..=policy.attempts {
        match within(policy.timeout, prober.ping(service, node)).await {
            Ok(true) => {
                metrics::record_probe("alive");
                return Some(attempt);
            }
            Ok(false) => {
                metrics::record_probe("unrecognized");
                tracing::warn!(service, node = %node, attempt, "Node does not serve service");
            }
            Err(DiscoveryError::Timeout(_)) => {
                metrics::record_probe("timeout");
                tracing::warn!(service, node = %node, attempt, "Health probe timed out");
            }
            Err(e) => {
                metrics::record_probe("error");
                tracing::warn!(service, node = %node, attempt, error = %e, "Health probe failed");
            }
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    None
}
