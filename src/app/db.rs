use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use todo_common::*;

use super::text::extract_mentions;

/// Async-safe handle to the database.
///
/// Wraps `TodoDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TodoDb>>,
}

impl DbHandle {
    pub fn new(db: TodoDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TodoDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI commands
    /// and tests only; never call this from a request handler.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TodoDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Field changes for a task. `assignee_id: Some(None)` clears the assignee.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub assignee_id: Option<Option<i64>>,
    pub pinned: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub url: String,
    pub thumbnail: Option<String>,
    pub filename: String,
    pub size: i64,
    pub content_type: String,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
}

/// Outcome of trying to join with an invite token.
#[derive(Debug, Clone, PartialEq)]
pub enum InviteRedemption {
    Joined(User),
    NotFound,
    Expired,
    AlreadyUsed,
    UsernameTaken,
}

const TASK_COLUMNS: &str = "t.id, t.project_id, t.title, t.status, t.author_id, t.assignee_id, t.pinned, \
     t.github_pr_url, t.github_pr_number, t.created_at, t.updated_at";

const MEDIA_COLUMNS: &str = "id, comment_id, url, thumbnail, filename, size, content_type, \
     storage_key, thumbnail_key, created_at";

/// Raw task row; `status` is parsed in `into_task`.
struct TaskRow {
    id: i64,
    project_id: Option<i64>,
    title: String,
    status: String,
    author_id: i64,
    assignee_id: Option<i64>,
    pinned: bool,
    github_pr_url: Option<String>,
    github_pr_number: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            status: row.get(3)?,
            author_id: row.get(4)?,
            assignee_id: row.get(5)?,
            pinned: row.get(6)?,
            github_pr_url: row.get(7)?,
            github_pr_number: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            status: Status::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            author_id: self.author_id,
            assignee_id: self.assignee_id,
            pinned: self.pinned,
            github_pr_url: self.github_pr_url,
            github_pr_number: self.github_pr_number,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        author_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        task_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get(0)?,
        comment_id: row.get(1)?,
        url: row.get(2)?,
        thumbnail: row.get(3)?,
        filename: row.get(4)?,
        size: row.get(5)?,
        content_type: row.get(6)?,
        storage_key: row.get(7)?,
        thumbnail_key: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn installation_from_row(row: &Row<'_>) -> rusqlite::Result<Installation> {
    Ok(Installation {
        id: row.get(0)?,
        github_installation_id: row.get(1)?,
        user_id: row.get(2)?,
        active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    ) && err.to_string().contains("UNIQUE")
}

pub struct TodoDb {
    conn: Connection,
}

impl TodoDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    author_id INTEGER NOT NULL REFERENCES users(id),
                    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    pinned INTEGER NOT NULL DEFAULT 0,
                    github_pr_url TEXT,
                    github_pr_number INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    author_id INTEGER NOT NULL REFERENCES users(id),
                    content TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS media (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    comment_id INTEGER REFERENCES comments(id) ON DELETE CASCADE,
                    url TEXT NOT NULL,
                    thumbnail TEXT,
                    filename TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    content_type TEXT NOT NULL,
                    storage_key TEXT NOT NULL,
                    thumbnail_key TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS installations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    github_installation_id INTEGER NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS invite_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    token TEXT NOT NULL UNIQUE,
                    expires_at TEXT NOT NULL,
                    used_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task_id);
                CREATE INDEX IF NOT EXISTS idx_media_comment ON media(comment_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, username: &str) -> Result<User> {
        self.conn
            .execute("INSERT INTO users (username) VALUES (?1)", params![username])
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by username")
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, username, created_at FROM users ORDER BY username")
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map([], user_from_row)
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?);
        }
        Ok(users)
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, slug: &str, author_id: Option<i64>) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (name, slug, author_id) VALUES (?1, ?2, ?3)",
                params![name, slug, author_id],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?.context("Project not found after insert")
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.name, p.slug, p.author_id, p.created_at,
                        (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id)
                 FROM projects p ORDER BY p.id",
            )
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProjectSummary {
                    project: project_from_row(row)?,
                    task_count: row.get(5)?,
                })
            })
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, slug, author_id, created_at FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()
            .context("Failed to query project")
    }

    pub fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, slug, author_id, created_at FROM projects WHERE slug = ?1",
                params![slug],
                project_from_row,
            )
            .optional()
            .context("Failed to query project by slug")
    }

    pub fn update_project(
        &self,
        id: i64,
        name: Option<&str>,
        slug: Option<&str>,
    ) -> Result<Option<Project>> {
        let Some(current) = self.get_project(id)? else {
            return Ok(None);
        };
        self.conn
            .execute(
                "UPDATE projects SET name = ?1, slug = ?2 WHERE id = ?3",
                params![name.unwrap_or(&current.name), slug.unwrap_or(&current.slug), id],
            )
            .context("Failed to update project")?;
        self.get_project(id)
    }

    pub fn delete_project(&self, id: i64) -> Result<Option<Project>> {
        let project = self.get_project(id)?;
        if project.is_some() {
            self.conn
                .execute("DELETE FROM projects WHERE id = ?1", params![id])
                .context("Failed to delete project")?;
        }
        Ok(project)
    }

    pub fn slug_taken(&self, slug: &str, except_id: Option<i64>) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM projects WHERE slug = ?1 AND id IS NOT ?2",
                params![slug, except_id],
                |row| row.get(0),
            )
            .context("Failed to check slug")
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(
        &self,
        title: &str,
        author_id: i64,
        project_id: Option<i64>,
        assignee_id: Option<i64>,
    ) -> Result<Task> {
        self.conn
            .execute(
                "INSERT INTO tasks (title, author_id, project_id, assignee_id) VALUES (?1, ?2, ?3, ?4)",
                params![title, author_id, project_id, assignee_id],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn get_task_view(&self, id: i64) -> Result<Option<TaskView>> {
        match self.get_task(id)? {
            Some(task) => Ok(Some(self.task_view(task)?)),
            None => Ok(None),
        }
    }

    fn task_view(&self, task: Task) -> Result<TaskView> {
        let assignee = match task.assignee_id {
            Some(id) => self.get_user(id)?,
            None => None,
        };
        let comment_count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM comments WHERE task_id = ?1 AND deleted_at IS NULL",
                params![task.id],
                |row| row.get(0),
            )
            .context("Failed to count comments")?;
        Ok(TaskView {
            task,
            assignee,
            comment_count,
        })
    }

    /// One page of tasks for a project (or for tasks without a project),
    /// pinned first, then newest first.
    pub fn list_tasks(&self, project_id: Option<i64>, limit: i64, offset: i64) -> Result<Vec<TaskView>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.project_id IS ?1
                 ORDER BY t.pinned DESC, t.id DESC LIMIT ?2 OFFSET ?3"
            ))
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![project_id, limit, offset], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let task = row.context("Failed to read task row")?.into_task()?;
            tasks.push(self.task_view(task)?);
        }
        Ok(tasks)
    }

    pub fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<Option<Task>> {
        let Some(current) = self.get_task(id)? else {
            return Ok(None);
        };
        let title = update.title.as_deref().unwrap_or(&current.title);
        let status = update.status.unwrap_or(current.status);
        let assignee_id = update.assignee_id.unwrap_or(current.assignee_id);
        let pinned = update.pinned.unwrap_or(current.pinned);
        self.conn
            .execute(
                "UPDATE tasks SET title = ?1, status = ?2, assignee_id = ?3, pinned = ?4,
                 updated_at = datetime('now') WHERE id = ?5",
                params![title, status.as_str(), assignee_id, pinned, id],
            )
            .context("Failed to update task")?;
        self.get_task(id)
    }

    /// Record the pull request linked to a task and move it to `status`.
    pub fn link_pull_request(
        &self,
        id: i64,
        status: Status,
        pr_url: &str,
        pr_number: i64,
    ) -> Result<Option<Task>> {
        self.conn
            .execute(
                "UPDATE tasks SET status = ?1, github_pr_url = ?2, github_pr_number = ?3,
                 updated_at = datetime('now') WHERE id = ?4",
                params![status.as_str(), pr_url, pr_number, id],
            )
            .context("Failed to link pull request")?;
        self.get_task(id)
    }

    pub fn set_task_status(&self, id: i64, status: Status) -> Result<Option<Task>> {
        self.conn
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update task status")?;
        self.get_task(id)
    }

    /// Delete a task, returning its last view (for notifications) and the
    /// media rows that went with it (for storage cleanup).
    pub fn delete_task(&self, id: i64) -> Result<Option<(TaskView, Vec<Media>)>> {
        let Some(view) = self.get_task_view(id)? else {
            return Ok(None);
        };
        let media = self.media_for_task(id)?;
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(Some((view, media)))
    }

    // ── Comments ──────────────────────────────────────────────────────

    /// Insert a comment and attach the given media, all in one transaction.
    /// Media already attached to another comment is left alone. Returns
    /// `None`, writing nothing, when the content is blank and none of the
    /// media could be attached.
    pub fn create_comment(
        &self,
        task_id: i64,
        author_id: i64,
        content: &str,
        media_ids: &[i64],
    ) -> Result<Option<Comment>> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO comments (task_id, author_id, content) VALUES (?1, ?2, ?3)",
            params![task_id, author_id, content],
        )
        .context("Failed to insert comment")?;
        let id = tx.last_insert_rowid();
        let mut attached = 0;
        for media_id in media_ids {
            attached += tx
                .execute(
                    "UPDATE media SET comment_id = ?1 WHERE id = ?2 AND comment_id IS NULL",
                    params![id, media_id],
                )
                .context("Failed to attach media")?;
        }
        if content.trim().is_empty() && attached == 0 {
            // Dropping the transaction rolls the insert back.
            return Ok(None);
        }
        tx.execute(
            "UPDATE tasks SET updated_at = datetime('now') WHERE id = ?1",
            params![task_id],
        )
        .context("Failed to touch task")?;
        tx.commit().context("Failed to commit comment")?;
        self.get_comment(id)?
            .context("Comment not found after insert")
            .map(Some)
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        self.conn
            .query_row(
                "SELECT id, task_id, author_id, content, created_at, updated_at, deleted_at
                 FROM comments WHERE id = ?1",
                params![id],
                comment_from_row,
            )
            .optional()
            .context("Failed to query comment")
    }

    pub fn list_comments(&self, task_id: i64) -> Result<Vec<CommentView>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.task_id, c.author_id, c.content, c.created_at, c.updated_at,
                        c.deleted_at, u.username
                 FROM comments c JOIN users u ON u.id = c.author_id
                 WHERE c.task_id = ?1 ORDER BY c.id",
            )
            .context("Failed to prepare list_comments")?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok((comment_from_row(row)?, row.get::<_, String>(7)?))
            })
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            let (comment, author_username) = row.context("Failed to read comment row")?;
            let media = if comment.deleted_at.is_some() {
                Vec::new()
            } else {
                self.media_for_comment(comment.id)?
            };
            let mentions = extract_mentions(&comment.content);
            comments.push(CommentView {
                comment,
                author_username,
                media,
                mentions,
            });
        }
        Ok(comments)
    }

    /// Replace the body of a live comment. Deleted comments are left blank.
    pub fn update_comment_content(&self, id: i64, content: &str) -> Result<Option<Comment>> {
        self.conn
            .execute(
                "UPDATE comments SET content = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![content, id],
            )
            .context("Failed to update comment")?;
        self.get_comment(id)
    }

    /// Blank the content and stamp `deleted_at`; the row stays so the
    /// thread keeps its shape.
    pub fn soft_delete_comment(&self, id: i64) -> Result<Option<Comment>> {
        self.conn
            .execute(
                "UPDATE comments SET content = '', deleted_at = datetime('now'),
                 updated_at = datetime('now') WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
            )
            .context("Failed to delete comment")?;
        self.get_comment(id)
    }

    // ── Media ─────────────────────────────────────────────────────────

    pub fn create_media(&self, media: &NewMedia) -> Result<Media> {
        self.conn
            .execute(
                "INSERT INTO media (url, thumbnail, filename, size, content_type, storage_key, thumbnail_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    media.url,
                    media.thumbnail,
                    media.filename,
                    media.size,
                    media.content_type,
                    media.storage_key,
                    media.thumbnail_key
                ],
            )
            .context("Failed to insert media")?;
        let id = self.conn.last_insert_rowid();
        self.get_media(id)?.context("Media not found after insert")
    }

    pub fn get_media(&self, id: i64) -> Result<Option<Media>> {
        self.conn
            .query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?1"),
                params![id],
                media_from_row,
            )
            .optional()
            .context("Failed to query media")
    }

    pub fn media_for_comment(&self, comment_id: i64) -> Result<Vec<Media>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MEDIA_COLUMNS} FROM media WHERE comment_id = ?1 ORDER BY id"
            ))
            .context("Failed to prepare media_for_comment")?;
        let rows = stmt
            .query_map(params![comment_id], media_from_row)
            .context("Failed to query media")?;
        let mut media = Vec::new();
        for row in rows {
            media.push(row.context("Failed to read media row")?);
        }
        Ok(media)
    }

    fn media_for_task(&self, task_id: i64) -> Result<Vec<Media>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MEDIA_COLUMNS} FROM media
                 WHERE comment_id IN (SELECT id FROM comments WHERE task_id = ?1) ORDER BY id"
            ))
            .context("Failed to prepare media_for_task")?;
        let rows = stmt
            .query_map(params![task_id], media_from_row)
            .context("Failed to query task media")?;
        let mut media = Vec::new();
        for row in rows {
            media.push(row.context("Failed to read media row")?);
        }
        Ok(media)
    }

    /// Delete media rows by id, returning the rows that existed.
    pub fn delete_media(&self, ids: &[i64]) -> Result<Vec<Media>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut deleted = Vec::new();
        for id in ids {
            if let Some(media) = self.get_media(*id)? {
                tx.execute("DELETE FROM media WHERE id = ?1", params![id])
                    .context("Failed to delete media")?;
                deleted.push(media);
            }
        }
        tx.commit().context("Failed to commit media deletion")?;
        Ok(deleted)
    }

    // ── Installations ─────────────────────────────────────────────────

    /// Record an installation; re-installing reactivates and re-owns it.
    pub fn upsert_installation(&self, github_installation_id: i64, user_id: i64) -> Result<Installation> {
        self.conn
            .execute(
                "INSERT INTO installations (github_installation_id, user_id, active) VALUES (?1, ?2, 1)
                 ON CONFLICT(github_installation_id) DO UPDATE SET user_id = excluded.user_id, active = 1",
                params![github_installation_id, user_id],
            )
            .context("Failed to upsert installation")?;
        self.get_installation(github_installation_id)?
            .context("Installation not found after upsert")
    }

    pub fn get_installation(&self, github_installation_id: i64) -> Result<Option<Installation>> {
        self.conn
            .query_row(
                "SELECT id, github_installation_id, user_id, active, created_at
                 FROM installations WHERE github_installation_id = ?1",
                params![github_installation_id],
                installation_from_row,
            )
            .optional()
            .context("Failed to query installation")
    }

    pub fn set_installation_active(&self, github_installation_id: i64, active: bool) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE installations SET active = ?1 WHERE github_installation_id = ?2",
                params![active, github_installation_id],
            )
            .context("Failed to update installation")?;
        Ok(count > 0)
    }

    pub fn delete_installation(&self, github_installation_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM installations WHERE github_installation_id = ?1",
                params![github_installation_id],
            )
            .context("Failed to delete installation")?;
        Ok(count > 0)
    }

    // ── Invite tokens ─────────────────────────────────────────────────

    pub fn create_invite(&self, token: &str, expires_at: DateTime<Utc>) -> Result<InviteToken> {
        self.conn
            .execute(
                "INSERT INTO invite_tokens (token, expires_at) VALUES (?1, ?2)",
                params![token, expires_at.to_rfc3339()],
            )
            .context("Failed to insert invite token")?;
        self.get_invite(token)?.context("Invite not found after insert")
    }

    pub fn get_invite(&self, token: &str) -> Result<Option<InviteToken>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, token, expires_at, used_at, created_at FROM invite_tokens WHERE token = ?1",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query invite token")?;
        let Some((id, token, expires_at, used_at, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(InviteToken {
            id,
            token,
            expires_at: parse_timestamp(&expires_at)?,
            used_at: used_at.as_deref().map(parse_timestamp).transpose()?,
            created_at,
        }))
    }

    /// Consume an invite token and create the joining user atomically.
    pub fn redeem_invite(
        &self,
        token: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteRedemption> {
        let Some(invite) = self.get_invite(token)? else {
            return Ok(InviteRedemption::NotFound);
        };
        if invite.is_used() {
            return Ok(InviteRedemption::AlreadyUsed);
        }
        if invite.is_expired_at(now) {
            return Ok(InviteRedemption::Expired);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let claimed = tx
            .execute(
                "UPDATE invite_tokens SET used_at = ?1 WHERE token = ?2 AND used_at IS NULL",
                params![now.to_rfc3339(), token],
            )
            .context("Failed to mark invite used")?;
        if claimed == 0 {
            return Ok(InviteRedemption::AlreadyUsed);
        }
        match tx.execute("INSERT INTO users (username) VALUES (?1)", params![username]) {
            Ok(_) => {}
            // Dropping the transaction rolls the claim back.
            Err(e) if is_unique_violation(&e) => return Ok(InviteRedemption::UsernameTaken),
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to insert user")),
        }
        let user_id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit invite redemption")?;
        let user = self.get_user(user_id)?.context("User not found after insert")?;
        Ok(InviteRedemption::Joined(user))
    }
}
