//! Account bootstrap commands: `todo init-db`, `todo create-user`,
//! `todo invite`.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use todo_list::app::db::{DbHandle, TodoDb};
use todo_list::app::invite::create_invite_link;
use todo_list::app::text::is_valid_username;
use todo_list::config::AppConfig;

fn open_db(config: &AppConfig) -> Result<TodoDb> {
    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    TodoDb::new(db_path)
}

pub fn cmd_init_db(config: &AppConfig) -> Result<()> {
    open_db(config)?;
    println!("Database initialized at {}", config.server.db_path.display());
    Ok(())
}

pub fn cmd_create_user(config: &AppConfig, username: &str) -> Result<()> {
    let username = username.trim().to_lowercase();
    if !is_valid_username(&username) {
        bail!(
            "Invalid username '{}': use 1-39 lowercase letters, digits, '-' or '_', starting with a letter or digit",
            username
        );
    }
    let db = open_db(config)?;
    if db.get_user_by_username(&username)?.is_some() {
        bail!("Username '{}' is already taken", username);
    }
    let user = db.create_user(&username)?;
    println!("Created user {} (id {})", user.username, user.id);
    Ok(())
}

pub async fn cmd_invite(config: &AppConfig) -> Result<()> {
    let db = DbHandle::new(open_db(config)?);
    let url = create_invite_link(&db, &config.app.base_url, Utc::now()).await?;
    println!("{}", url);
    Ok(())
}
