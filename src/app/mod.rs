//! Collaborative task tracker back-end.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, TraceLayer, /files)    │
//! └──────────┘          │    └─ api.rs  (CRUD handlers, AppState, ApiError)│
//!                       │         ├─ media.rs    (multipart upload/delete) │
//! ┌──────────┐  signed  │         ├─ invite.rs   (invite links, joining)   │
//! │  GitHub  │ ───────> │         └─ webhook.rs  (HMAC check, callback)    │
//! └──────────┘  POST    │                 │                                │
//!                       │                 v                                │
//!                       │  github.rs  (event models, branch → task sync)   │
//!                       │                 │                                │
//!                       │                 v                                │
//!                       │  notify/  (Notifier → Discord embeds) ─────────> │ Discord
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                           |
//! |------------|----------------------------------------------------------|
//! | `db`       | SQLite access via `DbHandle` (`Arc<Mutex<_>>` + blocking) |
//! | `storage`  | `ObjectStore` trait + local filesystem backend           |
//! | `imaging`  | JPEG re-encode, size cap and thumbnails for uploads      |
//! | `text`     | Mentions, task-list toggles, slug/username rules         |
//!
//! ## Typical Request Flow (PR merged)
//!
//! 1. `POST /webhook/github` → `webhook::github_webhook()` verifies
//!    `x-hub-signature-256` over the raw body.
//! 2. A `pull_request` event is parsed and handed to
//!    `github::handle_pull_request_event()`, which finds the task id in the
//!    head branch name.
//! 3. The task moves to `done` and `Notifier::notify()` fans the
//!    `task.pr_merged` event out to every subscribed webhook target.

pub mod api;
pub mod db;
pub mod github;
pub mod imaging;
pub mod invite;
pub mod media;
pub mod notify;
pub mod server;
pub mod storage;
pub mod text;
pub mod webhook;
