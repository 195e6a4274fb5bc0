//! Discord incoming-webhook payloads.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use todo_common::{EventData, EventType, Status, TaskView};

use super::Branding;

const AVATAR_BASE_URL: &str = "https://api.dicebear.com/9.x/dylan/png";

/// Discord caps embed field values at 1024 characters.
const MAX_COMMENT_CHARS: usize = 1018;
const TRUNCATED_COMMENT_CHARS: usize = 1015;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DiscordEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EmbedFooter {
    pub text: String,
}

pub fn color_for(event: EventType) -> u32 {
    match event {
        EventType::TaskCreated => 0x4ade80,
        EventType::TaskUpdated => 0x60a5fa,
        EventType::TaskStatusChanged => 0x818cf8,
        EventType::TaskAssigned => 0xa78bfa,
        EventType::TaskDeleted => 0xf87171,
        EventType::TaskPrOpened => 0x38bdf8,
        EventType::TaskPrMerged => 0x22c55e,
        EventType::CommentCreated => 0xfbbf24,
        EventType::UserJoined => 0xf472b6,
    }
}

fn avatar_url(seed: &str) -> Option<String> {
    reqwest::Url::parse_with_params(AVATAR_BASE_URL, &[("seed", seed)])
        .ok()
        .map(String::from)
}

fn author(prefix: &str, data: &EventData) -> Option<EmbedAuthor> {
    data.user.as_ref().map(|user| EmbedAuthor {
        name: format!("{}@{}", prefix, user.username),
        icon_url: avatar_url(&user.username),
    })
}

fn task_line(view: &TaskView) -> String {
    format!("{} `#{}`", view.task.title, view.task.id)
}

fn field_name(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn field_value(field: &str, view: &TaskView) -> String {
    let task = &view.task;
    match field {
        "title" => task.title.clone(),
        "status" => task.status.to_string(),
        "pinned" => (if task.pinned { "Yes" } else { "No" }).to_string(),
        "assignee" | "assignee_id" => view
            .assignee
            .as_ref()
            .map(|u| format!("@{}", u.username))
            .unwrap_or_else(|| "None".to_string()),
        _ => "None".to_string(),
    }
}

fn truncate_comment(comment: &str) -> String {
    if comment.chars().count() > MAX_COMMENT_CHARS {
        let head: String = comment.chars().take(TRUNCATED_COMMENT_CHARS).collect();
        format!("{}...", head)
    } else {
        comment.to_string()
    }
}

/// Build the webhook payload for an event, or `None` when `data` lacks what
/// the event needs.
pub fn build_payload(
    event: EventType,
    data: &EventData,
    branding: &Branding,
    now: DateTime<Utc>,
) -> Option<DiscordPayload> {
    let mut embed = DiscordEmbed {
        color: color_for(event),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        footer: EmbedFooter {
            text: branding.app_name.clone(),
        },
        ..Default::default()
    };
    let task_url = (!branding.base_url.is_empty()).then(|| branding.base_url.clone());

    match event {
        EventType::TaskCreated => {
            let view = data.task.as_ref()?;
            embed.title = Some("📣 New Task Created".into());
            embed.description = Some(task_line(view));
            embed.url = task_url;
            embed.fields.push(EmbedField::inline("Status", format!("`{}`", view.task.status)));
            if let Some(assignee) = &view.assignee {
                embed
                    .fields
                    .push(EmbedField::inline("Assigned to", format!("`@{}`", assignee.username)));
            }
            embed.author = author("Created by ", data);
        }
        EventType::TaskUpdated => {
            let view = data.task.as_ref()?;
            let fields = data.updated_fields.as_ref()?;
            embed.title = Some("✏️ Task Updated".into());
            embed.description = Some(format!("Update for `#{}`", view.task.id));
            embed.url = task_url;
            embed.fields = fields
                .iter()
                .map(|field| {
                    EmbedField::inline(
                        format!("New {}", field_name(field)),
                        format!("`{}`", field_value(field, view)),
                    )
                })
                .collect();
            embed.author = author("Updated by ", data);
        }
        EventType::TaskStatusChanged => {
            let view = data.task.as_ref()?;
            let previous = data.previous_status?;
            embed.title = Some("💡 Task Status Changed".into());
            embed.description = Some(if view.task.status == Status::Done {
                format!("~~{}~~ `#{}`", view.task.title, view.task.id)
            } else {
                task_line(view)
            });
            embed.url = task_url;
            embed.fields = vec![
                EmbedField::inline("From", format!("`{}`", previous)),
                EmbedField::inline("To", format!("`{}`", view.task.status)),
            ];
            embed.author = author("Changed by ", data);
        }
        EventType::TaskAssigned => {
            let view = data.task.as_ref()?;
            embed.title = Some("🖇️ Task Assigned".into());
            embed.description = Some(task_line(view));
            embed.url = task_url;
            if let Some(assignee) = &view.assignee {
                embed
                    .fields
                    .push(EmbedField::inline("Assigned to", format!("`@{}`", assignee.username)));
            }
            embed.author = author("Assigned by ", data);
        }
        EventType::TaskDeleted => {
            let view = data.task.as_ref()?;
            embed.title = Some("🗑️ Task Deleted".into());
            embed.description = Some(task_line(view));
            embed.author = author("Deleted by ", data);
        }
        EventType::TaskPrOpened | EventType::TaskPrMerged => {
            let view = data.task.as_ref()?;
            let pr_number = data.pr_number?;
            embed.title = Some(if event == EventType::TaskPrOpened {
                "🔀 Pull Request Opened".into()
            } else {
                "✅ Pull Request Merged".into()
            });
            embed.description = Some(task_line(view));
            embed.url = data.pr_url.clone().or(task_url);
            embed.fields.push(EmbedField::inline("Pull request", format!("`#{}`", pr_number)));
            if let Some(branch) = &data.branch_name {
                embed.fields.push(EmbedField::inline("Branch", format!("`{}`", branch)));
            }
        }
        EventType::CommentCreated => {
            let view = data.task.as_ref()?;
            let comment = data.comment.as_ref()?;
            embed.title = Some("💬 New Comment".into());
            embed.description = Some(format!("On task: {}", task_line(view)));
            embed.url = task_url;
            embed.fields.push(EmbedField {
                name: "Comment".into(),
                value: truncate_comment(comment),
                inline: false,
            });
            embed.author = author("", data);
        }
        EventType::UserJoined => {
            let user = data.user.as_ref()?;
            embed.title = Some("👋🏾 New User Joined".into());
            embed.description = Some(format!("`@{}` has joined the team!", user.username));
            embed.author = author("", data);
        }
    }

    Some(DiscordPayload {
        content: None,
        username: format!("{} Bot", branding.app_name),
        avatar_url: avatar_url(&branding.app_name),
        embeds: vec![embed],
    })
}

/// POST a payload to a Discord webhook URL.
pub async fn send(client: &reqwest::Client, url: &str, payload: &DiscordPayload) -> Result<()> {
    client
        .post(url)
        .json(payload)
        .send()
        .await
        .context("Failed to send Discord webhook")?
        .error_for_status()
        .context("Discord webhook returned error status")?;
    Ok(())
}
