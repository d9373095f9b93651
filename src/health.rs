//! Health probing for the supervised backend
//!
//! The probe serves two callers: the gateway's `/health` route, which
//! relays the backend's own health document, and the supervisor's startup
//! readiness poll, which only needs a cheap boolean answer.

use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BackendConfig, TimeoutConfig};
use crate::error::{json_response, RouteKind};

/// Timeout for a single boolean readiness probe
const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Queries the backend's health endpoint
pub struct HealthProbe {
    client: reqwest::Client,
    health_url: String,
    timeout: Duration,
    backend_name: String,
}

impl HealthProbe {
    pub fn new(backend: &BackendConfig, timeouts: &TimeoutConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            health_url: backend.health_url(),
            timeout: timeouts.health(),
            backend_name: backend.name.clone(),
        })
    }

    /// One readiness probe: does the health endpoint answer 2xx?
    pub async fn check(&self) -> bool {
        let request = self.client.get(&self.health_url).timeout(CHECK_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.health_url, error = %e, "Readiness probe failed");
                false
            }
        }
    }

    /// Relay the backend's health document, or synthesize the unhealthy
    /// document when the backend cannot be reached
    pub async fn relay(&self) -> Response<BoxBody<Bytes, hyper::Error>> {
        match tokio::time::timeout(self.timeout, self.fetch()).await {
            Ok(Ok((status, body))) => json_response(status, &body),
            Ok(Err(e)) => {
                warn!(url = %self.health_url, error = %e, "Health check failed");
                RouteKind::Health.degraded_response(&self.backend_name, &e.to_string())
            }
            Err(_) => {
                warn!(
                    url = %self.health_url,
                    timeout_secs = self.timeout.as_secs(),
                    "Health check timed out"
                );
                let detail = format!("health check timed out after {}s", self.timeout.as_secs());
                RouteKind::Health.degraded_response(&self.backend_name, &detail)
            }
        }
    }

    /// Fetch the health endpoint and decode its body as JSON. A body that
    /// is not valid JSON counts as a failed check.
    async fn fetch(&self) -> Result<(StatusCode, serde_json::Value), reqwest::Error> {
        let response = self.client.get(&self.health_url).send().await?;
        let status = response.status();
        let body = response.json::<serde_json::Value>().await?;
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use http_body_util::BodyExt;

    fn unreachable_probe() -> HealthProbe {
        // Port 1 is never listening in the test environment
        let backend = BackendConfig {
            command: "sleep 60".to_string(),
            port: 1,
            ..Default::default()
        };
        HealthProbe::new(&backend, &TimeoutConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_check_returns_false_when_unreachable() {
        let probe = unreachable_probe();
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_relay_synthesizes_unhealthy_document() {
        let probe = unreachable_probe();
        let response = probe.relay().await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "unhealthy");
        assert_eq!(value["message"], "VaultGuard backend is not responding");
        assert!(value["error"].is_string());
    }
}
