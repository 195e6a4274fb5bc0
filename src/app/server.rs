use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::api::{self, AppState};
use super::db::{DbHandle, TodoDb};
use super::notify::Notifier;
use super::storage::FilesystemStore;
use crate::config::AppConfig;

/// Mount point for objects held by the filesystem store.
pub const FILES_ROUTE: &str = "/files";

/// Build the full application router: API, webhooks, invites and stored files.
pub fn build_router(state: Arc<AppState>) -> Router {
    let files = ServeDir::new(&state.config.storage.root);
    let dev_mode = state.config.server.dev_mode;

    let mut app = api::api_router()
        .nest_service(FILES_ROUTE, files)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database and storage root described by `config`.
pub fn build_state(config: AppConfig) -> Result<Arc<AppState>> {
    if let Some(parent) = config.server.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.storage.root).with_context(|| {
        format!(
            "Failed to create storage directory {}",
            config.storage.root.display()
        )
    })?;

    let db = TodoDb::new(&config.server.db_path).context("Failed to initialize database")?;
    let store = FilesystemStore::new(&config.storage.root, &config.storage.public_url);
    let notifier = Notifier::from_config(&config);
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    Ok(Arc::new(AppState {
        db: DbHandle::new(db),
        config,
        notifier,
        store: Arc::new(store),
        http,
    }))
}

/// Start the server and run until Ctrl+C.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let host = if config.server.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.server.port);
    let db_path = config.server.db_path.clone();
    let webhook_targets = config.effective_webhooks().len();

    let app = build_router(build_state(config)?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(
        address = %local_addr,
        db = %db_path.display(),
        webhook_targets,
        "Todo server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C; shutting down"),
    }
}
