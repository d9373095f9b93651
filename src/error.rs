//! Degraded-mode responses returned when the backend cannot be reached
//!
//! Each route keeps its own 503 body shape: plaintext for the root route,
//! a JSON error object for the catch-all proxy, and the unhealthy document
//! for the health route. The asymmetry is part of the gateway's contract
//! with existing callers and must not be unified.

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use std::time::Duration;

use crate::config::TimeoutConfig;

/// Which gateway route a request was dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Exact `/`, forwarded to the backend root
    Root,
    /// Catch-all, forwarded to the same path on the backend
    Proxy,
    /// Exact `/health`, relayed from the backend's health endpoint
    Health,
}

impl RouteKind {
    /// Per-route forwarding timeout
    pub fn timeout(&self, timeouts: &TimeoutConfig) -> Duration {
        match self {
            RouteKind::Root => timeouts.root(),
            RouteKind::Proxy => timeouts.proxy(),
            RouteKind::Health => timeouts.health(),
        }
    }

    /// Build the 503 returned when forwarding on this route fails
    pub fn degraded_response(
        &self,
        backend_name: &str,
        detail: &str,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        match self {
            RouteKind::Root => {
                let body = format!(
                    "{} is starting up... Please refresh in a moment. Error: {}",
                    backend_name, detail
                );
                Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
                    .expect("valid response with StatusCode enum and static headers")
            }
            RouteKind::Proxy => {
                let body = serde_json::json!({
                    "error": format!("Service unavailable: {}", detail),
                });
                json_response(StatusCode::SERVICE_UNAVAILABLE, &body)
            }
            RouteKind::Health => {
                let body = serde_json::json!({
                    "status": "unhealthy",
                    "error": detail,
                    "message": format!("{} backend is not responding", backend_name),
                });
                json_response(StatusCode::SERVICE_UNAVAILABLE, &body)
            }
        }
    }
}

/// Build a JSON response from a serde_json value
pub fn json_response(
    status: StatusCode,
    body: &serde_json::Value,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = body.to_string();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Build the 405 returned for unsupported methods on the exact routes
pub fn method_not_allowed() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Allow", "GET")
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(
            Full::new(Bytes::from("Method Not Allowed"))
                .map_err(|e| match e {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use http_body_util::BodyExt;

    async fn body_string(response: Response<BoxBody<Bytes, hyper::Error>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_route_timeouts() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(RouteKind::Root.timeout(&timeouts), Duration::from_secs(5));
        assert_eq!(RouteKind::Proxy.timeout(&timeouts), Duration::from_secs(10));
        assert_eq!(RouteKind::Health.timeout(&timeouts), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_root_degraded_is_plaintext() {
        let response = RouteKind::Root.degraded_response("VaultGuard", "connection refused");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/plain; charset=utf-8"
        );

        let body = body_string(response).await;
        assert_eq!(
            body,
            "VaultGuard is starting up... Please refresh in a moment. Error: connection refused"
        );
    }

    #[tokio::test]
    async fn test_proxy_degraded_is_json() {
        let response = RouteKind::Proxy.degraded_response("VaultGuard", "connection refused");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );

        let body = body_string(response).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value["error"],
            "Service unavailable: connection refused"
        );
    }

    #[tokio::test]
    async fn test_health_degraded_is_unhealthy_document() {
        let response = RouteKind::Health.degraded_response("VaultGuard", "timed out");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_string(response).await;
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], "unhealthy");
        assert_eq!(value["error"], "timed out");
        assert_eq!(value["message"], "VaultGuard backend is not responding");
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let response = method_not_allowed();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("Allow").unwrap(), "GET");
    }
}
