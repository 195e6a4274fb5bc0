//! Layered configuration for the todo-list service.
//!
//! Settings are read from an optional TOML file, then overridden by
//! environment variables (a `.env` file is loaded first if present), then by
//! CLI flags.
//!
//! ```toml
//! [server]
//! port = 3000
//! db_path = "data/todo.db"
//!
//! [app]
//! name = "Todo List"
//! base_url = "https://todo.example.com"
//!
//! [github]
//! client_id = "Iv1.abc"
//! client_secret = "..."
//! webhook_secret = "..."
//!
//! [storage]
//! root = "data/media"
//! public_url = "https://todo.example.com/files"
//!
//! [[webhooks]]
//! type = "discord"
//! url = "https://discord.com/api/webhooks/..."
//! events = ["task.created", "comment.created"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use todo_common::EventType;

pub const DEFAULT_CONFIG_FILE: &str = "todo.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// Catch-all Discord target used when `webhooks` is empty.
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Settings that were ignored while loading. Logged once the
    /// subscriber is installed.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS and binding on all interfaces.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/todo.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Public origin of the web app, without a trailing slash.
    #[serde(default)]
    pub base_url: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            base_url: String::new(),
        }
    }
}

fn default_app_name() -> String {
    "Todo List".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_oauth_token_url")]
    pub oauth_token_url: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            webhook_secret: None,
            oauth_token_url: default_oauth_token_url(),
        }
    }
}

fn default_oauth_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// URL prefix under which stored objects are publicly reachable.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_url: default_public_url(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/media")
}

fn default_public_url() -> String {
    "/files".to_string()
}

/// Parse the `WEBHOOKS` JSON array, keeping only the entries that are
/// valid targets. Malformed JSON yields no targets.
fn parse_webhooks_env(raw: &str, warnings: &mut Vec<String>) -> Vec<WebhookConfig> {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            warnings.push(format!("Ignoring WEBHOOKS: not a JSON array of targets ({})", e));
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value(entry) {
            Ok(target) => Some(target),
            Err(e) => {
                warnings.push(format!("Ignoring WEBHOOKS entry {}: {}", i, e));
                None
            }
        })
        .collect()
}

/// One outbound notification target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When set, only these events are delivered.
    #[serde(default)]
    pub events: Option<Vec<EventType>>,
}

impl WebhookConfig {
    pub fn accepts(&self, event: EventType) -> bool {
        self.enabled
            && self
                .events
                .as_ref()
                .is_none_or(|events| events.contains(&event))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: text, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write a daily rolling log file here in addition to stderr.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration: file (if any) → `.env` → process environment.
    ///
    /// An explicitly named file must exist; the default `todo.toml` is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML configuration")
    }

    /// Override settings from environment variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", port))?;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(name) = lookup("APP_NAME") {
            self.app.name = name;
        }
        if let Some(url) = lookup("BASE_URL") {
            self.app.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(id) = lookup("GITHUB_CLIENT_ID") {
            self.github.client_id = Some(id);
        }
        if let Some(secret) = lookup("GITHUB_CLIENT_SECRET") {
            self.github.client_secret = Some(secret);
        }
        if let Some(secret) = lookup("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(root) = lookup("STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("STORAGE_PUBLIC_URL") {
            self.storage.public_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("WEBHOOKS") {
            self.webhooks = parse_webhooks_env(&raw, &mut self.warnings);
        }
        if let Some(url) = lookup("DISCORD_WEBHOOK_URL") {
            self.discord_webhook_url = Some(url);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Notification targets in effect, falling back to the catch-all
    /// Discord URL when no explicit targets are configured.
    pub fn effective_webhooks(&self) -> Vec<WebhookConfig> {
        if !self.webhooks.is_empty() {
            return self.webhooks.clone();
        }
        match &self.discord_webhook_url {
            Some(url) if !url.is_empty() => vec![WebhookConfig {
                kind: "discord".to_string(),
                url: url.clone(),
                enabled: true,
                events: None,
            }],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.db_path, PathBuf::from("data/todo.db"));
        assert_eq!(config.app.name, "Todo List");
        assert_eq!(config.storage.public_url, "/files");
        assert!(config.webhooks.is_empty());
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn parses_toml_sections() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 8080

            [app]
            name = "Team Board"
            base_url = "https://board.example.com"

            [github]
            webhook_secret = "s3cret"

            [[webhooks]]
            type = "discord"
            url = "https://discord.test/hook"
            events = ["task.created"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.app.name, "Team Board");
        assert_eq!(config.github.webhook_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.webhooks.len(), 1);
        assert!(config.webhooks[0].enabled);
        assert_eq!(config.webhooks[0].events, Some(vec![EventType::TaskCreated]));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::from_toml("[server]\nport = 8080\n").unwrap();
        config
            .apply_env(env(&[
                ("PORT", "9090"),
                ("BASE_URL", "https://x.test/"),
                ("GITHUB_WEBHOOK_SECRET", "abc"),
                ("LOG_FORMAT", "json"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.app.base_url, "https://x.test");
        assert_eq!(config.github.webhook_secret.as_deref(), Some("abc"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn webhooks_env_is_json() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[(
                "WEBHOOKS",
                r#"[{"type":"discord","url":"https://d.test","enabled":false}]"#,
            )]))
            .unwrap();
        assert_eq!(config.webhooks.len(), 1);
        assert!(!config.webhooks[0].enabled);
    }

    #[test]
    fn malformed_env_values_are_errors() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn malformed_webhooks_env_is_skipped() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("WEBHOOKS", "not json")])).unwrap();
        assert!(config.webhooks.is_empty());
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].starts_with("Ignoring WEBHOOKS"));

        let mut config = AppConfig::default();
        config
            .apply_env(env(&[(
                "WEBHOOKS",
                r#"[{"type":"discord","url":"https://a.test"},
                    {"url":"https://missing-type.test"},
                    {"type":"discord","url":"https://b.test","events":["task.exploded"]},
                    {"type":"discord","url":"https://c.test","events":["task.created"]}]"#,
            )]))
            .unwrap();
        let urls: Vec<&str> = config.webhooks.iter().map(|w| w.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test", "https://c.test"]);
        assert_eq!(config.warnings.len(), 2);
        assert!(config.warnings[0].contains("entry 1"));
        assert!(config.warnings[1].contains("entry 2"));
    }

    #[test]
    fn discord_url_is_fallback_target() {
        let mut config = AppConfig::default();
        assert!(config.effective_webhooks().is_empty());

        config.discord_webhook_url = Some("https://d.test".into());
        let targets = config.effective_webhooks();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].kind, "discord");
        assert!(targets[0].accepts(EventType::UserJoined));

        config.webhooks = vec![WebhookConfig {
            kind: "slack".into(),
            url: "https://s.test".into(),
            enabled: true,
            events: None,
        }];
        assert_eq!(config.effective_webhooks()[0].kind, "slack");
    }

    #[test]
    fn webhook_filter_respects_enabled_and_events() {
        let mut hook = WebhookConfig {
            kind: "discord".into(),
            url: "https://d.test".into(),
            enabled: true,
            events: Some(vec![EventType::CommentCreated]),
        };
        assert!(hook.accepts(EventType::CommentCreated));
        assert!(!hook.accepts(EventType::TaskCreated));
        hook.enabled = false;
        assert!(!hook.accepts(EventType::CommentCreated));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = AppConfig::from_file(Path::new("/nonexistent/todo.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
