//! Watchparty Server - Main Entry Point

use anyhow::Result;
use tracing::{info, warn};

use wp_server::{api, config, store, tasks};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wp_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Watchparty Server"
    );

    // Initialize the store
    let kv = match &config.redis_url {
        Some(url) => store::Kv::connect(url).await?,
        None => {
            warn!("REDIS_URL not set; using the in-process store (single instance only)");
            store::Kv::memory()
        }
    };

    // Build application state
    let state = api::AppState::new(config.clone(), kv)?;

    // Prune stale ids out of the active-rooms set in the background
    tasks::spawn_room_sweeper(state.clone());

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
