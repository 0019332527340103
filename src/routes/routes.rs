//! Defines routes for upload sessions and artifacts.
//!
//! ## Structure
//! - **Upload sessions** (under the API root)
//!   - `GET    /uploads/`              - list sessions
//!   - `POST   /uploads/`              - create a session of a declared size
//!   - `GET    /uploads/{id}/`         - session with received chunks
//!   - `PUT    /uploads/{id}/`         - upload one chunk (`Content-Range`)
//!   - `DELETE /uploads/{id}/`         - discard a session and its chunks
//!   - `POST   /uploads/{id}/commit/`  - finalize into an artifact
//!
//! - **Artifacts** (under the API root)
//!   - `GET    /artifacts/`
//!   - `GET    /artifacts/{id}/`
//!   - `DELETE /artifacts/{id}/`
//!
//! - **Probes** (server root): `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        artifact_handlers::{delete_artifact, get_artifact, list_artifacts},
        health_handlers::{healthz, readyz},
        upload_handlers::{
            commit_upload, create_upload, delete_upload, get_upload, list_uploads, upload_chunk,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Room for multipart boundaries and the `sha256` field around a chunk.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router for every endpoint, with the API mounted at `api_root`.
pub fn routes(api_root: &str, max_chunk_size: usize) -> Router<AppState> {
    let api = Router::new()
        .route("/uploads/", get(list_uploads).post(create_upload))
        .route(
            "/uploads/{id}/",
            get(get_upload).put(upload_chunk).delete(delete_upload),
        )
        .route("/uploads/{id}/commit/", post(commit_upload))
        .route("/artifacts/", get(list_artifacts))
        .route("/artifacts/{id}/", get(get_artifact).delete(delete_artifact))
        .layer(DefaultBodyLimit::max(
            max_chunk_size.saturating_add(MULTIPART_OVERHEAD),
        ));

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    if api_root.is_empty() {
        router.merge(api)
    } else {
        router.nest(api_root, api)
    }
}

/// The complete application with state attached.
pub fn app(state: AppState) -> Router {
    routes(&state.api_root, state.max_chunk_size).with_state(state)
}
