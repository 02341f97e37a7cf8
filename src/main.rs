//! UStore Flight server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrow_flight::flight_service_server::FlightServiceServer;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ustore_server::config::ServerConfig;
use ustore_server::engine::Engine;
use ustore_server::service::{ServerState, UStoreFlightService};
use ustore_server::session::SessionManager;

/// Transactional key-value store served over Apache Arrow Flight RPC.
#[derive(Parser, Debug)]
#[command(name = "ustore-server")]
#[command(about = "Transactional key-value store served over Arrow Flight RPC", long_about = None)]
struct Args {
    /// Configuration file path.
    #[arg(long, default_value = "/var/lib/ustore/config.json")]
    config: PathBuf,

    /// Port to use for connections.
    #[arg(short, long, default_value_t = 38709)]
    port: u16,

    /// Silence outputs.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(&args.config).context("failed to load configuration")?;
    init_tracing(&config, args.quiet);
    info!(config = ?config, "service configuration");

    let engine =
        Engine::open(&config.engine_json()?).context("failed to open the storage engine")?;
    let sessions = SessionManager::new(
        config.max_sessions,
        Duration::from_secs(config.session_timeout_seconds),
    );
    let state = Arc::new(ServerState::new(engine, sessions));
    let service = UStoreFlightService::new(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port)
        .parse()
        .context("failed to resolve bind address")?;

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<FlightServiceServer<UStoreFlightService>>()
        .await;

    if !args.quiet {
        println!("Listening on port: {}", args.port);
    }
    info!(%addr, "starting UStore Flight server");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
        }

        health_reporter
            .set_not_serving::<FlightServiceServer<UStoreFlightService>>()
            .await;
        let _ = shutdown_tx.send(());
    });

    Server::builder()
        .add_service(health_service)
        .add_service(FlightServiceServer::new(service))
        .serve_with_shutdown(addr, async {
            shutdown_rx.await.ok();
        })
        .await
        .context("Flight server terminated unexpectedly")?;

    info!("server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ServerConfig, quiet: bool) {
    let default_filter = if quiet { "error" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
