//! HTTP server command: `todo serve`.

use std::path::PathBuf;

use anyhow::Result;
use todo_list::config::AppConfig;

/// Apply CLI overrides on top of the loaded config and run the server.
pub async fn cmd_serve(
    mut config: AppConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(path) = db_path {
        config.server.db_path = path;
    }
    config.server.dev_mode |= dev;

    todo_list::app::server::start_server(config).await
}
