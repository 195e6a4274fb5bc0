//! Single-use invite links: minting tokens and joining with them.

use anyhow::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use todo_common::{EventData, EventType};
use tracing::info;

use super::api::{ApiError, SharedState};
use super::db::{DbHandle, InviteRedemption};
use super::text::is_valid_username;
use crate::errors::AppError;

pub const TOKEN_LENGTH: usize = 24;
pub const INVITE_TTL_HOURS: i64 = 12;

/// Random alphanumeric token.
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn invite_url(base_url: &str, token: &str) -> String {
    format!("{}/invite/{}", base_url.trim_end_matches('/'), token)
}

/// Store a fresh token valid for 12 hours from `now` and return its link.
pub async fn create_invite_link(db: &DbHandle, base_url: &str, now: DateTime<Utc>) -> Result<String> {
    let token = generate_token();
    let expires_at = now + Duration::hours(INVITE_TTL_HOURS);
    let stored = token.clone();
    db.call(move |db| db.create_invite(&stored, expires_at)).await?;
    info!(expires_at = %expires_at, "Invite link created");
    Ok(invite_url(base_url, &token))
}

#[derive(Serialize)]
pub struct InviteLink {
    pub url: String,
}

#[derive(Deserialize)]
pub struct JoinRequest {
    pub username: String,
}

/// `GET /invite`
pub async fn create_invite(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let url = create_invite_link(&state.db, &state.config.app.base_url, Utc::now()).await?;
    Ok(Json(InviteLink { url }))
}

/// `POST /invite/{token}`
pub async fn redeem_invite(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_lowercase();
    if !is_valid_username(&username) {
        return Err(ApiError::BadRequest(format!("Invalid username '{}'", username)));
    }

    let name = username.clone();
    let outcome = state
        .db
        .call(move |db| db.redeem_invite(&token, &name, Utc::now()))
        .await?;
    let user = match outcome {
        InviteRedemption::Joined(user) => user,
        InviteRedemption::NotFound => return Err(AppError::InviteNotFound.into()),
        InviteRedemption::Expired => return Err(AppError::InviteExpired.into()),
        InviteRedemption::AlreadyUsed => return Err(AppError::InviteUsed.into()),
        InviteRedemption::UsernameTaken => return Err(AppError::UsernameTaken(username).into()),
    };

    info!(user_id = user.id, username = %user.username, "User joined via invite");
    state.notifier.notify(
        EventType::UserJoined,
        EventData {
            user: Some(user.clone()),
            ..Default::default()
        },
    );
    Ok((StatusCode::CREATED, Json(user)))
}
