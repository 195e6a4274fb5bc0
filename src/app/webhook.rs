//! Inbound GitHub traffic: the signed webhook receiver and the App install
//! callback.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::Redirect,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::api::{ApiError, SharedState};
use super::github::{self, GitHubEventKind, InstallationEvent, PullRequestEvent};
use crate::errors::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

/// Check a `x-hub-signature-256` header against the raw request body.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), AppError> {
    let digest = header
        .and_then(|h| h.strip_prefix("sha256="))
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
        .ok_or(AppError::InvalidSignature)?;
    let expected = hex::decode(digest).map_err(|_| AppError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AppError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature)
}

fn parse_payload<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid payload: {}", e)))
}

/// `POST /webhook/github`
pub async fn github_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(secret) = state
        .config
        .github
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        warn!("Rejecting GitHub webhook: no webhook secret configured");
        return Err(AppError::WebhookSecretMissing.into());
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(secret, &body, signature) {
        warn!("Rejecting GitHub webhook with bad signature");
        return Err(e.into());
    }

    let event_name = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match GitHubEventKind::from_header(event_name) {
        Some(GitHubEventKind::Installation) => {
            let event: InstallationEvent = parse_payload(&body)?;
            github::handle_installation_event(&state.db, event).await?;
        }
        Some(GitHubEventKind::PullRequest) => {
            let event: PullRequestEvent = parse_payload(&body)?;
            github::handle_pull_request_event(&state.db, &state.notifier, event).await?;
        }
        None => debug!(event = event_name, "Ignoring GitHub event"),
    }
    Ok(Json(serde_json::json!({})))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub installation_id: Option<String>,
    /// Id of the user who started the install.
    pub state: Option<String>,
}

/// `GET /github-callback`: finish a GitHub App install and go home.
pub async fn github_callback(
    State(state): State<SharedState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let (Some(code), Some(installation_id)) =
        (non_empty(params.code), non_empty(params.installation_id))
    else {
        return Err(AppError::MissingParameters.into());
    };
    let installation_id: i64 = installation_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid installation_id '{}'", installation_id)))?;

    let gh = &state.config.github;
    let (Some(client_id), Some(client_secret)) = (gh.client_id.as_deref(), gh.client_secret.as_deref())
    else {
        return Err(ApiError::BadRequest("GitHub OAuth is not configured".into()));
    };

    let token = github::exchange_code(&state.http, &gh.oauth_token_url, client_id, client_secret, &code)
        .await?;
    if token.is_none() {
        return Err(ApiError::BadRequest("GitHub did not issue an access token".into()));
    }

    match params.state.and_then(|s| s.parse::<i64>().ok()) {
        Some(user_id) => {
            let installation = state
                .db
                .call(move |db| match db.get_user(user_id)? {
                    Some(_) => db.upsert_installation(installation_id, user_id).map(Some),
                    None => Ok(None),
                })
                .await?;
            match installation {
                Some(_) => info!(installation_id, user_id, "GitHub App installed"),
                None => warn!(installation_id, user_id, "Install callback for unknown user"),
            }
        }
        None => warn!(installation_id, "Install callback without a user; not recorded"),
    }
    Ok(Redirect::to("/"))
}
