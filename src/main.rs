use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use todo_list::config::AppConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "todo")]
#[command(version, about = "Collaborative task tracker with GitHub and Discord integration")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML config file. Defaults to ./todo.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations
    InitDb,
    /// Add a user directly, bypassing invites
    CreateUser { username: String },
    /// Print a fresh single-use invite link
    Invite,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let _log_guard = todo_list::logging::init(&config.logging, cli.verbose)?;
    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Serve { port, db_path, dev } => {
            cmd::cmd_serve(config, port, db_path, dev).await?;
        }
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::CreateUser { username } => cmd::cmd_create_user(&config, &username)?,
        Commands::Invite => cmd::cmd_invite(&config).await?,
    }

    Ok(())
}
