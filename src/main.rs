use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use vaultgate::config::Config;
use vaultgate::forward::Forwarder;
use vaultgate::gateway::GatewayServer;
use vaultgate::health::HealthProbe;
use vaultgate::supervisor::Supervisor;
use vaultgate::{PKG_NAME, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vaultgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    // One supervisor, shared between the boot path and the shutdown path
    let supervisor = Supervisor::new(config.backend.clone(), config.readiness.clone());
    let probe = Arc::new(HealthProbe::new(&config.backend, &config.timeouts)?);
    let forwarder = Arc::new(Forwarder::new(
        &config.backend,
        config.timeouts.clone(),
        &config.relay,
    )?);

    // The backend must be up before the listener opens
    if let Err(e) = supervisor.start(&probe).await {
        error!(error = %e, "Backend failed to start");
        supervisor.stop().await;
        return Err(e);
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = GatewayServer::new(bind_addr, forwarder, Arc::clone(&probe), shutdown_rx);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // The backend must be stopped before the gateway process exits
    info!("Stopping backend...");
    supervisor.stop().await;

    // Wait for the server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        backend = %config.backend.name,
        command = %config.backend.command,
        working_dir = ?config.backend.working_dir,
        target = %config.backend.base_url(),
        health_url = %config.backend.health_url(),
        "Supervised backend"
    );
    info!(
        poll_interval_ms = config.readiness.poll_interval_ms,
        startup_timeout_secs = config.readiness.startup_timeout_secs,
        "Readiness settings"
    );
    info!(
        root_secs = config.timeouts.root_secs,
        proxy_secs = config.timeouts.proxy_secs,
        health_secs = config.timeouts.health_secs,
        "Forwarding timeouts"
    );
}
