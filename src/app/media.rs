//! Media uploads: receive a multipart file, normalise images, store the
//! object (plus a thumbnail) and record it for later attachment to a comment.

use axum::{
    Json,
    extract::{Multipart, State},
    response::IntoResponse,
};
use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use todo_common::Media;
use tracing::{debug, info, warn};

use super::api::{ApiError, SharedState};
use super::db::NewMedia;
use super::imaging::{self, ProcessedImage};
use super::storage::ObjectStore;
use super::text::slugify;
use crate::errors::AppError;

pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_FOLDER: &str = "uploads";
const KEY_SUFFIX_LEN: usize = 8;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: i64,
    pub url: String,
    pub filename: String,
    pub size: i64,
    pub content_type: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMediaRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// Keep only plain path segments of a client-supplied folder.
pub fn sanitize_folder(folder: &str) -> String {
    let segments: Vec<String> = folder
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(slugify)
        .collect();
    if segments.is_empty() {
        DEFAULT_FOLDER.to_string()
    } else {
        segments.join("/")
    }
}

/// Split a filename into stem and lower-cased extension.
fn split_filename(filename: &str) -> (&str, Option<String>) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            let ext = ext.chars().all(|c| c.is_ascii_alphanumeric()).then_some(ext);
            (stem, ext)
        }
        _ => (filename, None),
    }
}

/// Unique object key: `{folder}/{slug}-{unix millis}_{random}.{ext}`.
pub fn object_key(folder: &str, filename: &str, ext: &str, now_millis: i64) -> String {
    let (stem, _) = split_filename(filename);
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}/{}-{}_{}.{}", folder, slugify(stem), now_millis, suffix, ext)
}

/// Thumbnail key next to `key`, under a `thumbs/` subfolder.
pub fn thumbnail_key(key: &str) -> String {
    match key.rsplit_once('/') {
        Some((dir, name)) => format!("{}/thumbs/{}", dir, name),
        None => format!("thumbs/{}", key),
    }
}

struct UploadedFile {
    filename: String,
    content_type: String,
    data: Vec<u8>,
}

/// Best-effort removal of stored objects; failures are logged, not returned.
pub async fn purge_objects(store: &dyn ObjectStore, media: &[Media]) {
    for item in media {
        let keys = std::iter::once(&item.storage_key).chain(item.thumbnail_key.as_ref());
        for key in keys.filter(|k| !k.is_empty()) {
            if let Err(e) = store.delete(key).await {
                warn!(media_id = item.id, key = %key, error = %e, "Failed to delete stored object");
            }
        }
    }
}

/// `POST /media`
pub async fn upload_media(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file: Option<UploadedFile> = None;
    let mut folder = DEFAULT_FOLDER.to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = match field.content_type() {
                    Some(ct) if ct != "application/octet-stream" => ct.to_string(),
                    _ => mime_guess::from_path(&filename)
                        .first_or_octet_stream()
                        .to_string(),
                };
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            Some("folder") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?;
                folder = sanitize_folder(&value);
            }
            other => debug!(field = ?other, "Ignoring upload field"),
        }
    }

    let file = file.filter(|f| !f.data.is_empty()).ok_or(AppError::NoFile)?;
    let media = store_upload(&state, &folder, file).await?;
    Ok(Json(UploadResponse {
        id: media.id,
        url: media.url,
        filename: media.filename,
        size: media.size,
        content_type: media.content_type,
        thumbnail: media.thumbnail,
    }))
}

async fn store_upload(state: &SharedState, folder: &str, file: UploadedFile) -> Result<Media, ApiError> {
    let UploadedFile {
        filename,
        content_type,
        data,
    } = file;
    let now_millis = Utc::now().timestamp_millis();

    let (data, thumbnail, content_type, ext) = if imaging::is_processable_image(&content_type) {
        let ProcessedImage { data, thumbnail, .. } =
            tokio::task::spawn_blocking(move || imaging::process_image(&data))
                .await
                .map_err(|e| ApiError::Internal(format!("Image task failed: {}", e)))?
                .map_err(AppError::from)?;
        (data, Some(thumbnail), "image/jpeg".to_string(), "jpg".to_string())
    } else {
        let ext = split_filename(&filename).1.unwrap_or_else(|| "bin".to_string());
        (data, None, content_type, ext)
    };

    let key = object_key(folder, &filename, &ext, now_millis);
    let thumb_key = thumbnail.as_ref().map(|_| thumbnail_key(&key));

    let store = state.store.as_ref();
    let put_main = store.put(&key, &data, &content_type);
    let put_thumb = async {
        match (&thumbnail, &thumb_key) {
            (Some(bytes), Some(k)) => store.put(k, bytes, "image/jpeg").await,
            _ => Ok(()),
        }
    };
    futures::future::try_join(put_main, put_thumb)
        .await
        .map_err(AppError::Storage)?;

    let record = NewMedia {
        url: store.url(&key),
        thumbnail: thumb_key.as_deref().map(|k| store.url(k)),
        filename,
        size: data.len() as i64,
        content_type,
        storage_key: key.clone(),
        thumbnail_key: thumb_key.clone(),
    };
    match state.db.call(move |db| db.create_media(&record)).await {
        Ok(media) => {
            info!(media_id = media.id, key = %media.storage_key, size = media.size, "Media uploaded");
            Ok(media)
        }
        Err(e) => {
            // Don't leave unreferenced objects behind.
            for k in std::iter::once(&key).chain(thumb_key.as_ref()) {
                if let Err(del) = store.delete(k).await {
                    warn!(key = %k, error = %del, "Failed to remove orphaned object");
                }
            }
            Err(e.into())
        }
    }
}

/// `PATCH /media`: delete media records and their stored objects.
pub async fn delete_media(
    State(state): State<SharedState>,
    Json(req): Json<DeleteMediaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("No media ids given".into()));
    }
    let ids = req.ids;
    let deleted = state.db.call(move |db| db.delete_media(&ids)).await?;
    purge_objects(state.store.as_ref(), &deleted).await;
    info!(count = deleted.len(), "Media deleted");
    Ok(Json(serde_json::json!({})))
}
