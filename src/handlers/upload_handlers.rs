//! HTTP handlers for upload sessions.
//! Chunk bodies are streamed into staging rather than buffered in memory.

use crate::{
    errors::AppError,
    handlers::extract::{JsonOrForm, parse_id},
    models::{
        artifact::ArtifactResponse,
        page::{Page, PageQuery},
        upload::{CommitUploadReq, CreateUploadReq, UploadDetailResponse, UploadResponse},
    },
    services::{chunk_validator::ContentRange, upload_service::StagedChunk},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use futures::TryStreamExt;
use std::io;

/// POST `/uploads/` - create an upload session.
pub async fn create_upload(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<CreateUploadReq>,
) -> Result<impl IntoResponse, AppError> {
    let upload = state.uploads.create_upload(req.size).await?;
    Ok((StatusCode::CREATED, Json(upload.to_response(&state.api_root))))
}

/// GET `/uploads/` - list upload sessions, newest first.
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<UploadResponse>>, AppError> {
    let (count, rows) = state.uploads.list_uploads(query).await?;
    let base = format!("{}/uploads/", state.api_root);
    let page = Page::new(&base, query, count, rows).map(|u| u.to_response(&state.api_root));
    Ok(Json(page))
}

/// GET `/uploads/{id}/` - session with its chunks sorted by offset.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDetailResponse>, AppError> {
    let id = parse_id(&id, "upload")?;
    let (upload, chunks) = state.uploads.get_upload(id).await?;
    Ok(Json(upload.to_detail(&state.api_root, &chunks)))
}

/// PUT `/uploads/{id}/` - upload one chunk.
///
/// The position comes from the `Content-Range` header; the body is a
/// multipart form with the bytes in `file` and an optional `sha256`.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let id = parse_id(&id, "upload")?;
    let range = headers
        .get(header::CONTENT_RANGE)
        .ok_or_else(|| AppError::bad_request("missing Content-Range header"))?
        .to_str()
        .map_err(|_| AppError::bad_request("Content-Range header is not valid ASCII"))?
        .parse::<ContentRange>()?;

    let mut staged: Option<StagedChunk> = None;
    let mut sha256: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {}", err)))?
    {
        match field.name() {
            Some("file") => {
                let body = field.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
                staged = Some(state.uploads.stage_chunk(body).await?);
            }
            Some("sha256") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid sha256 field: {}", err))
                })?;
                sha256 = Some(value);
            }
            other => {
                tracing::debug!(field = ?other, "ignoring unexpected multipart field");
            }
        }
    }

    let staged = staged.ok_or_else(|| AppError::bad_request("multipart field `file` is required"))?;
    let upload = state
        .uploads
        .put_chunk(id, range, staged, sha256.as_deref())
        .await?;

    Ok(Json(upload.to_response(&state.api_root)))
}

/// DELETE `/uploads/{id}/` - discard a session and its chunks.
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id, "upload")?;
    state.uploads.delete_upload(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/uploads/{id}/commit/` - finalize into an artifact.
pub async fn commit_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonOrForm(req): JsonOrForm<CommitUploadReq>,
) -> Result<(StatusCode, Json<ArtifactResponse>), AppError> {
    let id = parse_id(&id, "upload")?;
    let declared = req.sha256.as_deref().filter(|s| !s.trim().is_empty());
    let artifact = state.uploads.commit_upload(id, declared).await?;
    Ok((StatusCode::CREATED, Json(artifact.to_response(&state.api_root))))
}
