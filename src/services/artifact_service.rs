//! ArtifactService - content-addressed artifacts produced by commits.
//!
//! Metadata lives in the `artifacts` table, payloads under
//! `{media_root}/artifact/{sha256[0..2]}/{sha256[2..]}`. A SHA-256 maps to at
//! most one artifact.

use super::{
    UploadError, UploadResult,
    digest::Digests,
    is_unique_violation,
    media::{MediaLayout, StagedFile},
    session_locks::SessionLocks,
};
use crate::models::{artifact::Artifact, page::PageQuery};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::{io, path::PathBuf, sync::Arc};
use tokio::{fs, sync::OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ARTIFACT_COLUMNS: &str =
    "id, file, size, md5, sha224, sha256, sha384, sha512, created_at";

#[derive(Clone)]
pub struct ArtifactService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    pub media: MediaLayout,

    digest_locks: SessionLocks<String>,
}

/// Outcome of [`ArtifactService::register`].
#[derive(Debug)]
pub struct Registered {
    pub artifact: Artifact,
    /// False when an artifact with the same SHA-256 already existed.
    pub created: bool,
}

impl ArtifactService {
    pub fn new(db: Arc<SqlitePool>, media: MediaLayout) -> Self {
        Self {
            db,
            media,
            digest_locks: SessionLocks::new(),
        }
    }

    /// Exclusive access to the artifact identified by `sha256`. Held across
    /// registration and deletion so the payload file and its row change
    /// together.
    pub async fn lock_digest(&self, sha256: &str) -> OwnedMutexGuard<()> {
        self.digest_locks.acquire(&sha256.to_ascii_lowercase()).await
    }

    /// Turn a fully assembled staging file into an artifact.
    ///
    /// Runs on the caller's connection, normally inside the transaction
    /// that also retires the upload, and the caller must hold
    /// [`lock_digest`](Self::lock_digest) for `digests.sha256`. If an
    /// artifact with the same SHA-256 already exists it is returned and the
    /// staged bytes are discarded.
    pub async fn register(
        &self,
        conn: &mut SqliteConnection,
        staged: StagedFile,
        digests: Digests,
    ) -> UploadResult<Registered> {
        if let Some(existing) = fetch_by_sha256(conn, &digests.sha256).await? {
            debug!(artifact_id = %existing.id, sha256 = %digests.sha256, "reusing existing artifact");
            return Ok(Registered {
                artifact: existing,
                created: false,
            });
        }

        let file = MediaLayout::artifact_relative_path(&digests.sha256);
        let path = self.media.resolve(&file);
        staged.persist(&path).await?;

        let artifact = Artifact {
            id: Uuid::new_v4(),
            file,
            size: digests.size,
            md5: digests.md5,
            sha224: digests.sha224,
            sha256: digests.sha256,
            sha384: digests.sha384,
            sha512: digests.sha512,
            created_at: Utc::now(),
        };

        let insert = sqlx::query(
            "INSERT INTO artifacts (id, file, size, md5, sha224, sha256, sha384, sha512, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(artifact.id)
        .bind(&artifact.file)
        .bind(artifact.size)
        .bind(&artifact.md5)
        .bind(&artifact.sha224)
        .bind(&artifact.sha256)
        .bind(&artifact.sha384)
        .bind(&artifact.sha512)
        .bind(artifact.created_at)
        .execute(&mut *conn)
        .await;

        match insert {
            Ok(_) => {
                info!(
                    artifact_id = %artifact.id,
                    sha256 = %artifact.sha256,
                    size = artifact.size,
                    "created artifact"
                );
                Ok(Registered {
                    artifact,
                    created: true,
                })
            }
            // Same bytes registered by another process; the file we renamed
            // over theirs is identical.
            Err(err) if is_unique_violation(&err) => fetch_by_sha256(conn, &artifact.sha256)
                .await?
                .map(|artifact| Registered {
                    artifact,
                    created: false,
                })
                .ok_or(UploadError::Sqlx(err)),
            Err(err) => {
                let _ = fs::remove_file(&path).await;
                Err(UploadError::Sqlx(err))
            }
        }
    }

    /// Undo the file side of a registration whose transaction rolled back.
    pub async fn discard(&self, registered: &Registered) {
        if !registered.created {
            return;
        }
        let path = self.artifact_path(&registered.artifact);
        if let Err(err) = fs::remove_file(&path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to discard artifact file {}: {}", path.display(), err);
            }
        }
    }

    pub async fn get_artifact(&self, id: Uuid) -> UploadResult<Artifact> {
        sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {} FROM artifacts WHERE id = ?",
            ARTIFACT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => UploadError::ArtifactNotFound(id),
            other => UploadError::Sqlx(other),
        })
    }

    /// Newest first. Returns the total row count alongside the page.
    pub async fn list_artifacts(&self, query: PageQuery) -> UploadResult<(i64, Vec<Artifact>)> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
            .fetch_one(&*self.db)
            .await?;
        let rows = sqlx::query_as::<_, Artifact>(&format!(
            "SELECT {} FROM artifacts ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            ARTIFACT_COLUMNS
        ))
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(&*self.db)
        .await?;
        Ok((count, rows))
    }

    /// Delete an artifact and its payload. A second call returns
    /// `ArtifactNotFound`.
    pub async fn delete_artifact(&self, id: Uuid) -> UploadResult<Artifact> {
        let current = self.get_artifact(id).await?;
        let _guard = self.lock_digest(&current.sha256).await;

        let artifact = sqlx::query_as::<_, Artifact>(&format!(
            "DELETE FROM artifacts WHERE id = ? RETURNING {}",
            ARTIFACT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(UploadError::ArtifactNotFound(id))?;

        let path = self.media.resolve(&artifact.file);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed artifact file {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("artifact file {} already missing", path.display());
            }
            Err(err) => return Err(UploadError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.media
                .prune_empty_dirs(parent, &self.media.artifact_root())
                .await;
        }

        info!(artifact_id = %id, sha256 = %artifact.sha256, "deleted artifact");
        Ok(artifact)
    }

    /// Absolute payload path of an artifact.
    pub fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        self.media.resolve(&artifact.file)
    }
}

async fn fetch_by_sha256(
    conn: &mut SqliteConnection,
    sha256: &str,
) -> UploadResult<Option<Artifact>> {
    let artifact = sqlx::query_as::<_, Artifact>(&format!(
        "SELECT {} FROM artifacts WHERE sha256 = ?",
        ARTIFACT_COLUMNS
    ))
    .bind(sha256)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(artifact)
}
