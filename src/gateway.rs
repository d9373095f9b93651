//! The front-facing HTTP listener
//!
//! Three route shapes, resolved per request: the exact root route, the
//! exact health route, and a catch-all that forwards everything else.
//! Connections are served concurrently; the forwarder and probe are
//! stateless between requests, so requests only contend on the backend
//! itself.

use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{method_not_allowed, RouteKind};
use crate::forward::Forwarder;
use crate::health::HealthProbe;

/// Path of the gateway's own health route
const HEALTH_ROUTE: &str = "/health";

/// The gateway HTTP server
pub struct GatewayServer {
    bind_addr: SocketAddr,
    forwarder: Arc<Forwarder>,
    probe: Arc<HealthProbe>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        forwarder: Arc<Forwarder>,
        probe: Arc<HealthProbe>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            forwarder,
            probe,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let forwarder = Arc::clone(&self.forwarder);
                            let probe = Arc::clone(&self.probe);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, forwarder, probe).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    forwarder: Arc<Forwarder>,
    probe: Arc<HealthProbe>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let forwarder = Arc::clone(&forwarder);
        let probe = Arc::clone(&probe);
        async move { handle_request(req, forwarder, probe).await }
    });

    // Use auto::Builder to support both HTTP/1.1 and HTTP/2
    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    forwarder: Arc<Forwarder>,
    probe: Arc<HealthProbe>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let request_id = Uuid::new_v4().to_string();
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    debug!(%method, uri = %req.uri(), request_id, "Incoming request");

    // Exact routes answer GET only; everything else is the catch-all
    if path == "/" {
        if method == Method::GET {
            forwarder.forward(req, RouteKind::Root).await
        } else {
            Ok(method_not_allowed())
        }
    } else if path == HEALTH_ROUTE {
        if method == Method::GET {
            Ok(probe.relay().await)
        } else {
            Ok(method_not_allowed())
        }
    } else {
        forwarder.forward(req, RouteKind::Proxy).await
    }
}
