//! HTTP handlers for committed artifacts.

use crate::{
    errors::AppError,
    handlers::extract::parse_id,
    models::{
        artifact::ArtifactResponse,
        page::{Page, PageQuery},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

/// GET `/artifacts/`
pub async fn list_artifacts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<ArtifactResponse>>, AppError> {
    let (count, rows) = state.artifacts.list_artifacts(query).await?;
    let base = format!("{}/artifacts/", state.api_root);
    let page = Page::new(&base, query, count, rows).map(|a| a.to_response(&state.api_root));
    Ok(Json(page))
}

/// GET `/artifacts/{id}/`
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ArtifactResponse>, AppError> {
    let id = parse_id(&id, "artifact")?;
    let artifact = state.artifacts.get_artifact(id).await?;
    Ok(Json(artifact.to_response(&state.api_root)))
}

/// DELETE `/artifacts/{id}/` - remove metadata and payload.
pub async fn delete_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id, "artifact")?;
    state.artifacts.delete_artifact(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
