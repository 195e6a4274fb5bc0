//! Outbound notifications.
//!
//! Application events fan out to every configured webhook target whose
//! filter accepts them. Delivery is fire-and-forget: each send runs on its
//! own task and failures are only logged.

pub mod discord;

use chrono::Utc;
use todo_common::{EventData, EventType};
use tracing::{debug, warn};

use crate::config::{AppConfig, WebhookConfig};

/// Names and links embedded in outgoing messages.
#[derive(Debug, Clone)]
pub struct Branding {
    pub app_name: String,
    pub base_url: String,
}

/// Integrations a target's `type` can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Integration {
    Discord,
}

impl Integration {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "discord" => Some(Self::Discord),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    targets: Vec<WebhookConfig>,
    branding: Branding,
}

impl Notifier {
    pub fn new(targets: Vec<WebhookConfig>, branding: Branding) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets,
            branding,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.effective_webhooks(),
            Branding {
                app_name: config.app.name.clone(),
                base_url: config.app.base_url.clone(),
            },
        )
    }

    /// A notifier with no targets.
    pub fn disabled() -> Self {
        Self::new(
            Vec::new(),
            Branding {
                app_name: "Todo List".to_string(),
                base_url: String::new(),
            },
        )
    }

    /// Queue deliveries of `event` to every matching target. Returns the
    /// number of sends spawned. Must be called inside a tokio runtime.
    pub fn notify(&self, event: EventType, data: EventData) -> usize {
        let mut spawned = 0;
        for target in self.targets.iter().filter(|t| t.accepts(event)) {
            let Some(integration) = Integration::from_kind(&target.kind) else {
                warn!(kind = %target.kind, "Webhook type not implemented");
                continue;
            };
            match integration {
                Integration::Discord => {
                    let Some(payload) =
                        discord::build_payload(event, &data, &self.branding, Utc::now())
                    else {
                        debug!(%event, "Event data incomplete, skipping Discord message");
                        continue;
                    };
                    let client = self.client.clone();
                    let url = target.url.clone();
                    tokio::spawn(async move {
                        if let Err(e) = discord::send(&client, &url, &payload).await {
                            warn!(%event, error = %e, "Error sending discord webhook");
                        }
                    });
                    spawned += 1;
                }
            }
        }
        spawned
    }
}
