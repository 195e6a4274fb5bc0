//! Application events that fan out to notification targets.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Status, TaskView, User};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
    #[serde(rename = "task.status_changed")]
    TaskStatusChanged,
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    #[serde(rename = "task.pr_opened")]
    TaskPrOpened,
    #[serde(rename = "task.pr_merged")]
    TaskPrMerged,
    #[serde(rename = "comment.created")]
    CommentCreated,
    #[serde(rename = "user.joined")]
    UserJoined,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
        Self::TaskStatusChanged,
        Self::TaskAssigned,
        Self::TaskPrOpened,
        Self::TaskPrMerged,
        Self::CommentCreated,
        Self::UserJoined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskDeleted => "task.deleted",
            Self::TaskStatusChanged => "task.status_changed",
            Self::TaskAssigned => "task.assigned",
            Self::TaskPrOpened => "task.pr_opened",
            Self::TaskPrMerged => "task.pr_merged",
            Self::CommentCreated => "comment.created",
            Self::UserJoined => "user.joined",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| format!("Invalid event type: {}", s))
    }
}

/// Payload accompanying an [`EventType`]. Which fields are set depends on
/// the event; formatters skip events whose required fields are missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventData {
    pub task: Option<TaskView>,
    /// The user who triggered the event.
    pub user: Option<User>,
    pub previous_status: Option<Status>,
    pub comment: Option<String>,
    pub updated_fields: Option<Vec<String>>,
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub branch_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parses_dotted_names() {
        assert_eq!(
            "task.status_changed".parse::<EventType>().unwrap(),
            EventType::TaskStatusChanged
        );
        assert!("task.exploded".parse::<EventType>().is_err());
    }

    #[test]
    fn event_type_serde_matches_as_str() {
        for event in EventType::ALL {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }
}
