//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    db,
    services::{artifact_service::ArtifactService, media::MediaLayout, upload_service::UploadService},
};
use anyhow::{Context, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub artifacts: ArtifactService,
    /// Prefix for every href rendered in responses.
    pub api_root: String,
    pub max_chunk_size: usize,
}

impl AppState {
    /// Open the database, apply the schema, prepare the media root and
    /// recover uploads left mid-commit by a previous run.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let pool = db::connect(&cfg.database_url).await?;
        db::run_migrations(&pool).await?;

        let media = MediaLayout::new(cfg.media_root.clone());
        let uploads = UploadService::new(Arc::new(pool), media, cfg.max_upload_size);
        uploads
            .recover()
            .await
            .with_context(|| format!("preparing media root {}", cfg.media_root.display()))?;

        Ok(Self {
            artifacts: uploads.artifacts.clone(),
            uploads,
            api_root: cfg.api_root.clone(),
            max_chunk_size: cfg.max_chunk_size,
        })
    }
}
