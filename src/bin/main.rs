use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use cybergym_server::blob::BlobStore;
use cybergym_server::config::Config;
use cybergym_server::coordinator::Coordinator;
use cybergym_server::db::PocStore;
use cybergym_server::http::{build_router, AppState};
use cybergym_server::sandbox::BollardEngine;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();

    std::fs::create_dir_all(&config.log_dir)?;

    let store = PocStore::connect(&config.sqlite_url()).await?;
    let blobs = BlobStore::new(&config.log_dir);
    let engine = Arc::new(BollardEngine::connect()?);

    let addr = SocketAddr::new(config.host, config.port);
    let app_config = config.clone();
    let coordinator = Arc::new(Coordinator::new(store, blobs, config, engine));

    let state = AppState {
        coordinator: coordinator.clone(),
        config: Arc::new(app_config),
    };
    let app = build_router(state);

    let (shutdown_sender, mut shutdown_receiver) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("received shutdown signal, shutting down");
        let _ = shutdown_sender.send(());
    });

    tracing::info!(%addr, "cybergym-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_receiver.recv().await;
        })
        .await?;

    coordinator.store().close().await;
    tracing::info!("cybergym-server shut down cleanly");

    Ok(())
}
