//! GitHub App integration: OAuth install exchange, webhook event models,
//! and the task status sync driven by pull-request events.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use todo_common::{EventData, EventType, Status};
use tracing::{debug, info};

use super::db::DbHandle;
use super::notify::Notifier;

/// A branch-name token that names a task.
static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#?(\d+)$").expect("valid task id regex"));

/// Events we subscribe to via the `x-github-event` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubEventKind {
    Installation,
    PullRequest,
}

impl GitHubEventKind {
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "installation" => Some(Self::Installation),
            "pull_request" => Some(Self::PullRequest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationEvent {
    pub action: String,
    pub installation: InstallationRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub head: GitRef,
    pub html_url: String,
    pub number: i64,
    #[serde(default)]
    pub merged: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// Task id named by a branch: the first `/`, `-` or `_` separated token
/// that is all digits (optionally prefixed with `#`).
///
/// `feature/fix-123-bug` and `123-fix` both name task 123.
pub fn extract_task_id(branch_name: &str) -> Option<i64> {
    branch_name
        .split(['/', '-', '_'])
        .filter_map(|part| TASK_ID_RE.captures(part))
        .find_map(|caps| caps[1].parse::<i64>().ok())
}

/// Apply an installation lifecycle event. Returns whether a record changed.
pub async fn handle_installation_event(db: &DbHandle, event: InstallationEvent) -> Result<bool> {
    let installation_id = event.installation.id;
    let changed = match event.action.as_str() {
        "deleted" => {
            db.call(move |db| db.delete_installation(installation_id))
                .await?
        }
        "suspend" => {
            db.call(move |db| db.set_installation_active(installation_id, false))
                .await?
        }
        "unsuspend" => {
            db.call(move |db| db.set_installation_active(installation_id, true))
                .await?
        }
        other => {
            debug!(action = other, installation_id, "Ignoring installation action");
            false
        }
    };
    if changed {
        info!(action = %event.action, installation_id, "Installation updated");
    }
    Ok(changed)
}

/// Move the task linked by the PR's branch: opened/reopened → in review
/// (recording the PR), merged → done. Returns the task id it touched.
pub async fn handle_pull_request_event(
    db: &DbHandle,
    notifier: &Notifier,
    event: PullRequestEvent,
) -> Result<Option<i64>> {
    let pr = event.pull_request;
    let (status, notification) = match event.action.as_str() {
        "opened" | "reopened" => (Status::InReview, EventType::TaskPrOpened),
        "closed" if pr.merged => (Status::Done, EventType::TaskPrMerged),
        other => {
            debug!(action = other, number = pr.number, "Ignoring pull request action");
            return Ok(None);
        }
    };

    let branch_name = pr.head.ref_name.clone();
    let Some(task_id) = extract_task_id(&branch_name) else {
        debug!(branch = %branch_name, "Branch names no task");
        return Ok(None);
    };

    let pr_url = pr.html_url.clone();
    let pr_number = pr.number;
    let view = db
        .call(move |db| {
            let updated = if status == Status::InReview {
                db.link_pull_request(task_id, status, &pr_url, pr_number)?
            } else {
                db.set_task_status(task_id, status)?
            };
            match updated {
                Some(task) => db.get_task_view(task.id),
                None => Ok(None),
            }
        })
        .await?;

    let Some(view) = view else {
        debug!(task_id, "Pull request references unknown task");
        return Ok(None);
    };

    info!(task_id, status = %status, pr = pr.number, "Task synced from pull request");
    notifier.notify(
        notification,
        EventData {
            task: Some(view),
            pr_url: Some(pr.html_url),
            pr_number: Some(pr.number),
            branch_name: Some(branch_name),
            ..Default::default()
        },
    );
    Ok(Some(task_id))
}

/// Exchange an OAuth `code` for an access token. Returns `None` when GitHub
/// answers without a token.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
) -> Result<Option<String>> {
    let resp = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
        ])
        .send()
        .await
        .context("Failed to send token request to GitHub")?
        .json::<AccessTokenResponse>()
        .await
        .context("Failed to parse token response from GitHub")?;

    if let Some(err) = resp.error {
        debug!(error = %err, "GitHub rejected OAuth code");
    }
    Ok(resp.access_token.filter(|t| !t.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::db::TodoDb;

    fn pr_event(action: &str, branch: &str, merged: bool) -> PullRequestEvent {
        PullRequestEvent {
            action: action.to_string(),
            pull_request: PullRequest {
                head: GitRef {
                    ref_name: branch.to_string(),
                },
                html_url: "https://github.com/o/r/pull/8".to_string(),
                number: 8,
                merged,
            },
        }
    }

    fn setup() -> (DbHandle, i64) {
        let db = TodoDb::new_in_memory().unwrap();
        let user = db.create_user("ann").unwrap();
        let task = db.create_task("t", user.id, None, None).unwrap();
        (DbHandle::new(db), task.id)
    }

    #[test]
    fn extracts_first_numeric_token() {
        assert_eq!(extract_task_id("feature/fix-123-bug"), Some(123));
        assert_eq!(extract_task_id("123-fix"), Some(123));
        assert_eq!(extract_task_id("fix_#42_login"), Some(42));
        assert_eq!(extract_task_id("release/v2-7"), Some(7));
        assert_eq!(extract_task_id("chore/12/34"), Some(12));
    }

    #[test]
    fn branches_without_numeric_token_name_no_task() {
        assert_eq!(extract_task_id("main"), None);
        assert_eq!(extract_task_id("feature/v2-login"), None);
        assert_eq!(extract_task_id("fix12-bug"), None);
        assert_eq!(extract_task_id(""), None);
    }

    #[test]
    fn overflowing_tokens_are_skipped() {
        assert_eq!(extract_task_id("99999999999999999999-5"), Some(5));
    }

    #[test]
    fn parses_pull_request_payload() {
        let json = r#"{
            "action": "closed",
            "number": 8,
            "pull_request": {
                "head": {"ref": "feature/1-x", "sha": "abc"},
                "html_url": "https://github.com/o/r/pull/8",
                "number": 8,
                "merged": true
            },
            "repository": {"full_name": "o/r"}
        }"#;
        let event: PullRequestEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.pull_request.head.ref_name, "feature/1-x");
        assert!(event.pull_request.merged);
    }

    #[test]
    fn event_kind_from_header() {
        assert_eq!(
            GitHubEventKind::from_header("pull_request"),
            Some(GitHubEventKind::PullRequest)
        );
        assert_eq!(GitHubEventKind::from_header("push"), None);
    }

    #[tokio::test]
    async fn opened_pr_moves_task_to_review() {
        let (db, task_id) = setup();
        let branch = format!("feature/fix-{}-bug", task_id);
        let touched = handle_pull_request_event(&db, &Notifier::disabled(), pr_event("opened", &branch, false))
            .await
            .unwrap();
        assert_eq!(touched, Some(task_id));

        let task = db.call(move |db| db.get_task(task_id)).await.unwrap().unwrap();
        assert_eq!(task.status, Status::InReview);
        assert_eq!(task.github_pr_number, Some(8));
        assert_eq!(task.github_pr_url.as_deref(), Some("https://github.com/o/r/pull/8"));
    }

    #[tokio::test]
    async fn merged_pr_marks_task_done() {
        let (db, task_id) = setup();
        let branch = format!("{}-fix", task_id);
        handle_pull_request_event(&db, &Notifier::disabled(), pr_event("reopened", &branch, false))
            .await
            .unwrap();
        handle_pull_request_event(&db, &Notifier::disabled(), pr_event("closed", &branch, true))
            .await
            .unwrap();
        let task = db.call(move |db| db.get_task(task_id)).await.unwrap().unwrap();
        assert_eq!(task.status, Status::Done);
        assert_eq!(task.github_pr_number, Some(8));
    }

    #[tokio::test]
    async fn closed_unmerged_pr_changes_nothing() {
        let (db, task_id) = setup();
        let branch = format!("{}-fix", task_id);
        let touched = handle_pull_request_event(&db, &Notifier::disabled(), pr_event("closed", &branch, false))
            .await
            .unwrap();
        assert_eq!(touched, None);
        let task = db.call(move |db| db.get_task(task_id)).await.unwrap().unwrap();
        assert_eq!(task.status, Status::Pending);
    }

    #[tokio::test]
    async fn unknown_task_is_ignored() {
        let (db, _) = setup();
        let touched = handle_pull_request_event(&db, &Notifier::disabled(), pr_event("opened", "feature/9999-x", false))
            .await
            .unwrap();
        assert_eq!(touched, None);
        let touched = handle_pull_request_event(&db, &Notifier::disabled(), pr_event("opened", "main", false))
            .await
            .unwrap();
        assert_eq!(touched, None);
    }

    #[tokio::test]
    async fn installation_actions_update_record() {
        let db = TodoDb::new_in_memory().unwrap();
        let user = db.create_user("ann").unwrap();
        db.upsert_installation(55, user.id).unwrap();
        let db = DbHandle::new(db);

        let event = |action: &str| InstallationEvent {
            action: action.to_string(),
            installation: InstallationRef { id: 55 },
        };

        assert!(handle_installation_event(&db, event("suspend")).await.unwrap());
        assert!(!db.call(|db| db.get_installation(55)).await.unwrap().unwrap().active);
        assert!(handle_installation_event(&db, event("unsuspend")).await.unwrap());
        assert!(db.call(|db| db.get_installation(55)).await.unwrap().unwrap().active);
        assert!(!handle_installation_event(&db, event("new_permissions_accepted")).await.unwrap());
        assert!(handle_installation_event(&db, event("deleted")).await.unwrap());
        assert!(db.call(|db| db.get_installation(55)).await.unwrap().is_none());
    }
}
