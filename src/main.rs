use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod admin;
mod config;
mod error;
mod keys;
mod names;
mod routes;

use keys::{KeyStore, KEYS_FILE_NAME};
use routes::{build_router, AppState};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filedrop=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("FILEDROP_CONFIG_FILE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let store_override = std::env::var("FILEDROP_FILE_STORE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    let config = config::load(&config_path, store_override)
        .await
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let keys_path = config.file_store.join(KEYS_FILE_NAME);
    let keys = KeyStore::load(&keys_path)
        .await
        .with_context(|| format!("loading authorised keys from {}", keys_path.display()))?;

    if config.require_api_key && keys.is_empty().await {
        warn!("requireApiKey is on but no keys exist; uploads will be refused until one is created via POST /admin/keys");
    }
    if config.admin_ips.is_empty() {
        warn!("adminIps is empty; the admin interface is unreachable");
    }

    let addr = if config.host.contains(':') {
        format!("[{}]:{}", config.host, config.port)
    } else {
        format!("{}:{}", config.host, config.port)
    };
    info!(
        "filedrop starting: addr={} file_store={} require_api_key={}",
        addr,
        config.file_store.display(),
        config.require_api_key
    );

    let app = build_router(AppState::new(config, keys));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}
