use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use todo_common::{EventData, EventType, Status, TaskView, User};
use tracing::error;

use super::db::{DbHandle, TaskUpdate, TodoDb};
use super::notify::Notifier;
use super::storage::ObjectStore;
use super::text::{is_valid_project_name, is_valid_slug, toggle_task_item};
use super::{invite, media, webhook};
use crate::config::AppConfig;
use crate::errors::AppError;

pub const TASKS_PER_PAGE: i64 = 20;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub config: AppConfig,
    pub notifier: Notifier,
    pub store: Arc<dyn ObjectStore>,
    /// Client for outbound GitHub calls.
    pub http: reqwest::Client,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub slug: String,
    pub author_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    /// Project slug; omitted lists tasks that belong to no project.
    pub project: Option<String>,
    pub page: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub author_id: i64,
    pub project_id: Option<i64>,
    pub assignee_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub actor_id: Option<i64>,
    pub title: Option<String>,
    pub status: Option<Status>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
    pub pinned: Option<bool>,
}

#[derive(Deserialize)]
pub struct ActorQuery {
    pub actor_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct AuthorQuery {
    pub author_id: i64,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub author_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub author_id: i64,
    pub content: String,
}

#[derive(Deserialize)]
pub struct ToggleCheckboxRequest {
    pub author_id: i64,
    pub line: usize,
    pub checked: bool,
}

#[derive(Serialize)]
pub struct RawComment {
    pub id: i64,
    pub content: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Gone(String),
    MethodNotAllowed,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let msg = err.to_string();
        match err {
            AppError::InvalidSignature
            | AppError::WebhookSecretMissing
            | AppError::MissingParameters
            | AppError::UsernameTaken(_)
            | AppError::NoFile
            | AppError::Image(_)
            | AppError::BadRequest(_) => ApiError::BadRequest(msg),
            AppError::InviteNotFound | AppError::NotFound { .. } => ApiError::NotFound(msg),
            AppError::InviteExpired | AppError::InviteUsed => ApiError::Gone(msg),
            AppError::Forbidden(_) => ApiError::Forbidden(msg),
            AppError::Storage(_) | AppError::Other(_) => ApiError::Internal(msg),
        }
    }
}

fn not_found(entity: &'static str, id: i64) -> ApiError {
    AppError::NotFound { entity, id }.into()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            patch(update_project).delete(delete_project),
        )
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route(
            "/api/tasks/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/comments/{id}",
            get(get_comment).patch(update_comment).delete(delete_comment),
        )
        .route("/api/comments/{id}/checkbox", patch(toggle_checkbox))
        .route("/api/users", get(list_users))
        .route(
            "/media",
            post(media::upload_media)
                .patch(media::delete_media)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(media::MAX_UPLOAD_BYTES)),
        )
        .route("/webhook/github", post(webhook::github_webhook))
        .route("/github-callback", get(webhook::github_callback))
        .route("/invite", get(invite::create_invite))
        .route("/invite/{token}", post(invite::redeem_invite))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

async fn load_user(state: &SharedState, id: Option<i64>) -> Result<Option<User>, ApiError> {
    match id {
        Some(id) => Ok(state.db.call(move |db| db.get_user(id)).await?),
        None => Ok(None),
    }
}

async fn require_user(state: &SharedState, id: i64) -> Result<User, ApiError> {
    load_user(state, Some(id))
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown user {}", id)))
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_users(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.call(|db| db.list_users()).await?;
    Ok(Json(users))
}

// Projects

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let projects = state.db.call(|db| db.list_projects()).await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let slug = req.slug.trim().to_string();
    if !is_valid_project_name(&name) {
        return Err(ApiError::BadRequest("Project name must be 1-14 characters".into()));
    }
    if !is_valid_slug(&slug) {
        return Err(ApiError::BadRequest(format!("Invalid slug '{}'", slug)));
    }
    if let Some(author_id) = req.author_id {
        require_user(&state, author_id).await?;
    }
    let author_id = req.author_id;
    let project = state
        .db
        .call(move |db| {
            if db.slug_taken(&slug, None)? {
                return Ok(None);
            }
            db.create_project(&name, &slug, author_id).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::BadRequest("Slug is already in use".into()))?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn update_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.map(|n| n.trim().to_string());
    let slug = req.slug.map(|s| s.trim().to_string());
    if name.as_deref().is_some_and(|n| !is_valid_project_name(n)) {
        return Err(ApiError::BadRequest("Project name must be 1-14 characters".into()));
    }
    if let Some(s) = slug.as_deref().filter(|s| !is_valid_slug(s)) {
        return Err(ApiError::BadRequest(format!("Invalid slug '{}'", s)));
    }
    let result = state
        .db
        .call(move |db| {
            if db.get_project(id)?.is_none() {
                return Ok(Err(not_found("Project", id)));
            }
            if let Some(s) = slug.as_deref() {
                if db.slug_taken(s, Some(id))? {
                    return Ok(Err(ApiError::BadRequest("Slug is already in use".into())));
                }
            }
            let project = db
                .update_project(id, name.as_deref(), slug.as_deref())?
                .ok_or_else(|| not_found("Project", id));
            Ok(project)
        })
        .await??;
    Ok(Json(result))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.delete_project(id))
        .await?
        .ok_or_else(|| not_found("Project", id))?;
    Ok(Json(project))
}

// Tasks

async fn list_tasks(
    State(state): State<SharedState>,
    Query(query): Query<TaskListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(0);
    if page < 0 {
        return Err(ApiError::BadRequest("page must not be negative".into()));
    }
    let slug = query.project;
    let tasks = state
        .db
        .call(move |db| {
            let project_id = match slug {
                Some(slug) => match db.get_project_by_slug(&slug)? {
                    Some(project) => Some(project.id),
                    None => return Ok(None),
                },
                None => None,
            };
            db.list_tasks(project_id, TASKS_PER_PAGE, page.saturating_mul(TASKS_PER_PAGE))
                .map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".into()))?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| db.get_task_view(id))
        .await?
        .ok_or_else(|| not_found("Task", id))?;
    Ok(Json(task))
}

async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title must not be empty".into()));
    }
    let author = require_user(&state, req.author_id).await?;
    if let Some(assignee_id) = req.assignee_id {
        require_user(&state, assignee_id).await?;
    }
    let (author_id, project_id, assignee_id) = (author.id, req.project_id, req.assignee_id);
    let view = state
        .db
        .call(move |db| {
            if let Some(pid) = project_id {
                if db.get_project(pid)?.is_none() {
                    return Ok(None);
                }
            }
            let task = db.create_task(&title, author_id, project_id, assignee_id)?;
            db.get_task_view(task.id)
        })
        .await?
        .ok_or_else(|| ApiError::BadRequest("Unknown project".into()))?;

    state.notifier.notify(
        EventType::TaskCreated,
        EventData {
            task: Some(view.clone()),
            user: Some(author),
            ..Default::default()
        },
    );
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.map(|t| t.trim().to_string());
    if title.as_deref().is_some_and(str::is_empty) {
        return Err(ApiError::BadRequest("Title must not be empty".into()));
    }
    if let Some(Some(assignee_id)) = req.assignee_id {
        require_user(&state, assignee_id).await?;
    }
    let actor = load_user(&state, req.actor_id).await?;

    let update = TaskUpdate {
        title,
        status: req.status,
        assignee_id: req.assignee_id,
        pinned: req.pinned,
    };
    let (before, after) = state
        .db
        .call(move |db| {
            let Some(before) = db.get_task(id)? else {
                return Ok(None);
            };
            db.update_task(id, &update)?;
            let after = db.get_task_view(id)?;
            Ok(after.map(|after| (before, after)))
        })
        .await?
        .ok_or_else(|| not_found("Task", id))?;

    for (event, data) in task_change_events(&before, &after, actor) {
        state.notifier.notify(event, data);
    }
    Ok(Json(after))
}

/// One notification per kind of change between two task snapshots, in
/// emission order. Clearing the assignee or toggling the pin emits nothing.
fn task_change_events(
    before: &todo_common::Task,
    after: &TaskView,
    actor: Option<User>,
) -> Vec<(EventType, EventData)> {
    let base = EventData {
        task: Some(after.clone()),
        user: actor,
        ..Default::default()
    };
    let mut events = Vec::new();
    if before.status != after.task.status {
        events.push((
            EventType::TaskStatusChanged,
            EventData {
                previous_status: Some(before.status),
                ..base.clone()
            },
        ));
    }
    if before.assignee_id != after.task.assignee_id && after.task.assignee_id.is_some() {
        events.push((EventType::TaskAssigned, base.clone()));
    }
    if before.title != after.task.title {
        events.push((
            EventType::TaskUpdated,
            EventData {
                updated_fields: Some(vec!["title".to_string()]),
                ..base
            },
        ));
    }
    events
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Query(query): Query<ActorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = load_user(&state, query.actor_id).await?;
    let (view, attachments) = state
        .db
        .call(move |db| db.delete_task(id))
        .await?
        .ok_or_else(|| not_found("Task", id))?;

    media::purge_objects(state.store.as_ref(), &attachments).await;
    state.notifier.notify(
        EventType::TaskDeleted,
        EventData {
            task: Some(view.clone()),
            user: actor,
            ..Default::default()
        },
    );
    Ok(Json(view))
}

// Comments

async fn list_comments(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .db
        .call(move |db| {
            if db.get_task(task_id)?.is_none() {
                return Ok(None);
            }
            db.list_comments(task_id).map(Some)
        })
        .await?
        .ok_or_else(|| not_found("Task", task_id))?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() && req.media_ids.is_empty() {
        return Err(ApiError::BadRequest("Comment must have content or media".into()));
    }
    let author = require_user(&state, req.author_id).await?;
    let author_id = author.id;
    let media_ids = req.media_ids;
    let body = content.clone();
    let (comment, task) = state
        .db
        .call(move |db| {
            if db.get_task(task_id)?.is_none() {
                return Ok(None);
            }
            let Some(comment) = db.create_comment(task_id, author_id, &body, &media_ids)? else {
                return Ok(Some(None));
            };
            let task = db.get_task_view(task_id)?;
            Ok(task.map(|task| Some((comment, task))))
        })
        .await?
        .ok_or_else(|| not_found("Task", task_id))?
        .ok_or_else(|| ApiError::BadRequest("Comment must have content or media".into()))?;

    if !content.is_empty() {
        state.notifier.notify(
            EventType::CommentCreated,
            EventData {
                task: Some(task),
                user: Some(author),
                comment: Some(content),
                ..Default::default()
            },
        );
    }
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn get_comment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .db
        .call(move |db| db.get_comment(id))
        .await?
        .ok_or_else(|| not_found("Comment", id))?;
    Ok(Json(RawComment {
        id: comment.id,
        content: comment.content,
    }))
}

/// Run `apply` against comment `id` once it is known to exist, belong to
/// `author_id`, and not be deleted. The check and the write share one
/// database call.
async fn modify_comment<F>(
    state: &SharedState,
    id: i64,
    author_id: i64,
    apply: F,
) -> Result<todo_common::Comment, ApiError>
where
    F: FnOnce(
            &TodoDb,
            &todo_common::Comment,
        ) -> anyhow::Result<Result<Option<todo_common::Comment>, ApiError>>
        + Send
        + 'static,
{
    state
        .db
        .call(move |db| {
            let Some(comment) = db.get_comment(id)? else {
                return Ok(Err(not_found("Comment", id)));
            };
            if comment.author_id != author_id {
                return Ok(Err(AppError::Forbidden("comment").into()));
            }
            if comment.deleted_at.is_some() {
                return Ok(Err(ApiError::BadRequest("Comment has been deleted".into())));
            }
            apply(db, &comment)
        })
        .await??
        .ok_or_else(|| not_found("Comment", id))
}

async fn update_comment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Comment must not be empty".into()));
    }
    let comment = modify_comment(&state, id, req.author_id, move |db, _| {
        db.update_comment_content(id, &content).map(Ok)
    })
    .await?;
    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Query(query): Query<AuthorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = modify_comment(&state, id, query.author_id, move |db, _| {
        db.soft_delete_comment(id).map(Ok)
    })
    .await?;
    Ok(Json(comment))
}

async fn toggle_checkbox(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleCheckboxRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (line, checked) = (req.line, req.checked);
    let comment = modify_comment(&state, id, req.author_id, move |db, comment| {
        match toggle_task_item(&comment.content, line, checked) {
            Some(content) => db.update_comment_content(id, &content).map(Ok),
            None => Ok(Err(ApiError::BadRequest(format!(
                "Line {} is not a task list item",
                line
            )))),
        }
    })
    .await?;
    Ok(Json(comment))
}
