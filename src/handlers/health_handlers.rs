//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness: metadata database and media root are usable

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when SQLite answers `SELECT 1` and a probe file can be written, read
/// back and removed in the staging directory; 503 otherwise. Each check is
/// reported separately.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", check_sqlite(&state.uploads.db).await);
    checks.insert("disk", check_disk(&state.uploads.media.tmp_dir()).await);

    let ready = checks.values().all(|c| c.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn check_sqlite(db: &SqlitePool) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => CheckStatus::pass(),
        Ok(v) => CheckStatus::fail(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::fail(format!("error: {}", e)),
    }
}

async fn check_disk(dir: &Path) -> CheckStatus {
    if let Err(e) = fs::create_dir_all(dir).await {
        return CheckStatus::fail(format!("could not create {}: {}", dir.display(), e));
    }

    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&probe, PROBE_BYTES).await {
        Ok(_) => match fs::read(&probe).await {
            Ok(bytes) if bytes == PROBE_BYTES => CheckStatus::pass(),
            Ok(_) => CheckStatus::fail("file content mismatch"),
            Err(e) => CheckStatus::fail(format!("could not read probe file: {}", e)),
        },
        Err(e) => return CheckStatus::fail(format!("could not write probe file: {}", e)),
    };

    match fs::remove_file(&probe).await {
        Ok(_) => result,
        Err(e) if result.ok => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {}", e)),
        },
        Err(_) => result,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn pass() -> Self {
        Self { ok: true, error: None }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
