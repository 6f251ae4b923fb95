use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::garage_config::{CatalogEntry, GarageConfig, PushConfig, default_catalog};

use super::api::{self, AppState, SharedState};
use super::catalog::RepairCatalog;
use super::db::{DbHandle, GarageDb};
use super::progress::spawn_progress_ticker;
use super::push::sender_from_config;
use super::triggers::Notifier;
use super::ws::{self, WsEvent};

/// Capacity of the live-update channel. Slow subscribers past this lag and
/// skip events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the garage server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    /// `None` disables the progress ticker.
    pub progress_tick: Option<Duration>,
    pub push: PushConfig,
    pub catalog: Vec<CatalogEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: PathBuf::from(".garage/garage.db"),
            dev_mode: false,
            progress_tick: Some(Duration::from_secs(2)),
            push: PushConfig::default(),
            catalog: default_catalog(),
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &GarageConfig) -> Self {
        let progress = &config.toml.progress;
        Self {
            host: config.host(),
            port: config.port(),
            db_path: config.db_path(),
            dev_mode: config.dev_mode(),
            progress_tick: (progress.enabled && progress.tick_secs > 0)
                .then(|| Duration::from_secs(progress.tick_secs)),
            push: config.toml.push.clone(),
            catalog: config.toml.catalog.clone(),
        }
    }
}

/// Assemble shared state around an open database.
pub fn build_state(db: GarageDb, config: &ServerConfig) -> Result<SharedState> {
    let db = DbHandle::new(db);
    let (ws_tx, _rx) = broadcast::channel::<WsEvent>(WS_CHANNEL_CAPACITY);
    let push = sender_from_config(&config.push).context("Failed to configure push sender")?;
    tracing::info!(backend = %config.push.backend, "push sender ready");

    Ok(Arc::new(AppState {
        notifier: Notifier::new(db.clone(), Arc::from(push), config.push.icon.clone()),
        db,
        ws_tx,
        catalog: RepairCatalog::new(config.catalog.clone()),
    }))
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Start the garage server and block until shutdown.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = GarageDb::new(&config.db_path).context("Failed to initialize garage database")?;
    let state = build_state(db, &config)?;

    let ticker = config.progress_tick.map(|every| {
        spawn_progress_ticker(state.db.clone(), state.ws_tx.clone(), every)
    });

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        db = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "garage server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
