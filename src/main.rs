//! Cargohold Server
//!
//! A resumable chunked file-upload server speaking a length-prefixed
//! binary protocol over TCP, staging chunks locally and committing
//! completed files to S3-compatible object storage.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cargohold::auth::TokenStore;
use cargohold::config::Config;
use cargohold::server::{self, Dispatcher};
use cargohold::storage::S3ObjectStore;
use cargohold::upload::{ChunkReceiver, Finalizer, LocalChunkStaging, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cargohold=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    tracing::info!("Starting Cargohold Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("S3 endpoint: {}", config.storage.endpoint);
    tracing::info!("S3 bucket: {}", config.storage.bucket);
    tracing::info!("Staging dir: {}", config.upload.staging_dir.display());

    // Wire up storage, staging, and the session services
    let store = Arc::new(S3ObjectStore::new(&config.storage).await?);
    let staging: Arc<dyn cargohold::upload::ChunkStaging> =
        Arc::new(LocalChunkStaging::new(config.upload.staging_dir.clone()));

    let auth = TokenStore::from_config(&config.auth).await;
    let sessions = SessionStore::new(config.upload.clone());
    let finalizer = Finalizer::new(staging.clone(), store);
    let receiver = ChunkReceiver::new(sessions.clone(), staging.clone(), finalizer);

    sessions.clone().start_sweep_task(staging.clone());

    let dispatcher = Arc::new(Dispatcher::new(auth, sessions, receiver, staging));

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Cargohold Server listening on {}", addr);

    tokio::select! {
        _ = server::run(listener, dispatcher) => {},
        _ = shutdown_signal() => {},
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
