mod config;
mod store;
mod store_manager;
mod api;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::store::ConfigStore;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dlna_registryd=info"))
        )
        .init();

    tracing::info!("Starting dlna-registryd");

    // Load config: environment over file over defaults
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/dlna-registry/registryd.toml".to_string());

    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config
        .apply_env()
        .context("Invalid settings in environment")?;

    tracing::info!(
        "{} {} on {} {}, notify interval {:?}",
        config.settings.product,
        config.settings.version,
        config.settings.platform,
        config.settings.platform_version,
        config.settings.notify_interval()
    );

    let store = ConfigStore::new(config.settings.clone())
        .context("Invalid alias rules")?;

    // Surface damaged tables once at startup; reads keep whatever still parses
    let devices = store.load_devices();
    if !devices.is_pristine() {
        tracing::warn!("Device table {} damaged: {:?}", store.data_path().display(), devices.status);
    }
    let locations = store.load_locations();
    if !locations.is_pristine() {
        tracing::warn!("Location table {} damaged: {:?}", store.locations_path().display(), locations.status);
    }
    tracing::info!(
        "Registry has {} devices and {} locations",
        devices.table.len(),
        locations.table.len()
    );

    let initial_digest = store.digest();
    tracing::info!("Initial registry digest: {}", initial_digest);

    let (digest_tx, digest_rx) = watch::channel(initial_digest);

    // Start store thread
    let store_handle = StoreHandle::spawn(store, digest_tx);

    let app_state = api::routes::AppState {
        store: store_handle.clone(),
        digest_rx,
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = server_handle.await;

    // Shutdown store thread
    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
