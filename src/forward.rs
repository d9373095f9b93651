//! Request forwarding to the supervised backend
//!
//! Every inbound request maps to exactly one outbound request: same
//! method, same path, and (for the methods that carry them) the raw query
//! string and a re-sent JSON body. The backend's reply is relayed
//! verbatim; transport failures and timeouts become the route's degraded
//! 503 response. One attempt per request, no retries.

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use tracing::{debug, warn};

use crate::config::{BackendConfig, RelayConfig, TimeoutConfig};
use crate::error::RouteKind;

/// Failure modes when relaying a request to the backend
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("request timed out after {0}s")]
    TimedOut(u64),
    #[error(transparent)]
    Upstream(#[from] reqwest::Error),
}

/// The parts of a backend reply relayed to the caller
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Translates inbound requests into outbound requests against the backend
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
    backend_name: String,
    timeouts: TimeoutConfig,
    /// Lowercased response-header deny list; empty means verbatim relay
    blocked_headers: Vec<String>,
}

impl Forwarder {
    pub fn new(
        backend: &BackendConfig,
        timeouts: TimeoutConfig,
        relay: &RelayConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: backend.base_url(),
            backend_name: backend.name.clone(),
            timeouts,
            blocked_headers: relay.blocked_lowercase(),
        })
    }

    /// Forward one inbound request and relay the backend's reply
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        route: RouteKind,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let method = req.method().clone();
        let target = self.target_url(route, &method, req.uri());
        let timeout = route.timeout(&self.timeouts);

        // Only POST and PUT carry a body upstream, and only when the
        // inbound bytes parse as JSON; anything else is treated as absent
        let body = if method == Method::POST || method == Method::PUT {
            let bytes = req.into_body().collect().await?.to_bytes();
            parse_json_body(&bytes)
        } else {
            None
        };

        let result = tokio::time::timeout(timeout, self.send(&method, &target, body)).await;

        let error = match result {
            Ok(Ok(upstream)) => {
                debug!(%method, target, status = %upstream.status, "Relaying backend response");
                return Ok(self.relay_response(upstream));
            }
            Ok(Err(e)) => e,
            Err(_) => ForwardError::TimedOut(timeout.as_secs()),
        };

        warn!(%method, target, error = %error, "Failed to forward request");
        Ok(route.degraded_response(&self.backend_name, &error.to_string()))
    }

    /// Build the outbound target URL for a route.
    ///
    /// The root route always points at the backend root, query dropped.
    /// On the catch-all, the standard methods carry the raw query string
    /// through byte-for-byte (order and duplicates preserved); any other
    /// method forwards the path alone.
    fn target_url(&self, route: RouteKind, method: &Method, uri: &Uri) -> String {
        if route == RouteKind::Root {
            return format!("{}/", self.base_url);
        }

        let carries_query = matches!(
            *method,
            Method::GET | Method::DELETE | Method::POST | Method::PUT
        );
        if carries_query {
            let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            format!("{}{}", self.base_url, path_and_query)
        } else {
            format!("{}{}", self.base_url, uri.path())
        }
    }

    /// One outbound attempt: send and read the full reply
    async fn send(
        &self,
        method: &Method,
        target: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ForwardedResponse, ForwardError> {
        let mut request = self.client.request(method.clone(), target);
        if let Some(ref value) = body {
            request = request.json(value);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ForwardedResponse {
            status,
            headers,
            body,
        })
    }

    /// Rebuild the backend reply for the caller: status and body bytes
    /// unchanged, headers relayed minus framing and the deny list
    fn relay_response(&self, upstream: ForwardedResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
        let mut builder = Response::builder().status(upstream.status);

        if let Some(headers) = builder.headers_mut() {
            for (name, value) in upstream.headers.iter() {
                // The relayed body is already de-chunked; the server
                // recomputes framing
                if matches!(name.as_str(), "content-length" | "transfer-encoding") {
                    continue;
                }
                if self.blocked_headers.iter().any(|b| b == name.as_str()) {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }

        builder
            .body(Full::new(upstream.body).map_err(|e| match e {}).boxed())
            .expect("valid response with relayed status and headers")
    }
}

/// Parse inbound body bytes as JSON; malformed or empty bodies are absent
fn parse_json_body(bytes: &[u8]) -> Option<serde_json::Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "Inbound body is not JSON, forwarding without a body");
            None
        }
    }
}
