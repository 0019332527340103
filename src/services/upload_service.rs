//! src/services/upload_service.rs
//!
//! UploadService - chunked upload sessions backed by SQLite for metadata and
//! the local disk for chunk payloads.
//!
//! A session moves through `open → committing` and is deleted by a
//! successful commit or an explicit delete. Chunk bodies are received and
//! hashed without any lock; only the short step that places a staged chunk
//! into its session runs under the session's lock, which commit and delete
//! hold for their whole duration.

use super::{
    UploadError, UploadResult,
    artifact_service::ArtifactService,
    chunk_validator::{self, ContentRange, Placement},
    digest::MultiHasher,
    media::{MediaLayout, StagedFile},
    session_locks::SessionLocks,
};
use crate::models::{
    artifact::Artifact,
    page::PageQuery,
    upload::{Upload, UploadChunk, UploadState},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UPLOAD_COLUMNS: &str = "id, size, state, created_at";
const CHUNK_COLUMNS: &str = "id, upload_id, chunk_offset, size, sha256, created_at";

/// A chunk body written to staging, with the SHA-256 computed while it was
/// received.
#[derive(Debug)]
pub struct StagedChunk {
    file: StagedFile,
    sha256: String,
}

impl StagedChunk {
    pub fn size(&self) -> i64 {
        self.file.size()
    }
}

#[derive(Clone)]
pub struct UploadService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    pub media: MediaLayout,

    pub artifacts: ArtifactService,

    locks: SessionLocks,

    max_upload_size: u64,
}

impl UploadService {
    pub fn new(db: Arc<SqlitePool>, media: MediaLayout, max_upload_size: u64) -> Self {
        let artifacts = ArtifactService::new(db.clone(), media.clone());
        Self {
            db,
            media,
            artifacts,
            locks: SessionLocks::new(),
            max_upload_size,
        }
    }

    /// Put sessions interrupted mid-commit back to `open` and drop stale
    /// staging files. Run once at startup, before serving requests.
    pub async fn recover(&self) -> UploadResult<()> {
        self.media.ensure_dirs().await?;

        let reopened = sqlx::query("UPDATE uploads SET state = ? WHERE state = ?")
            .bind(UploadState::Open)
            .bind(UploadState::Committing)
            .execute(&*self.db)
            .await?
            .rows_affected();
        let swept = self.media.clear_staging().await?;

        if reopened > 0 || swept > 0 {
            warn!(reopened, swept, "recovered interrupted uploads");
        }
        Ok(())
    }

    // --- session manager ---

    /// Allocate a session of `size` bytes.
    pub async fn create_upload(&self, size: i64) -> UploadResult<Upload> {
        if size < 0 || size as u64 > self.max_upload_size {
            return Err(UploadError::InvalidSize {
                size,
                max: self.max_upload_size,
            });
        }

        let upload = Upload {
            id: Uuid::new_v4(),
            size,
            state: UploadState::Open,
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO uploads (id, size, state, created_at) VALUES (?, ?, ?, ?)")
            .bind(upload.id)
            .bind(upload.size)
            .bind(upload.state)
            .bind(upload.created_at)
            .execute(&*self.db)
            .await?;

        info!(upload_id = %upload.id, size, "created upload");
        Ok(upload)
    }

    /// Session metadata plus its chunks sorted by offset.
    pub async fn get_upload(&self, id: Uuid) -> UploadResult<(Upload, Vec<UploadChunk>)> {
        let upload = self.fetch_upload(id).await?;
        let chunks = self.fetch_chunks(id).await?;
        Ok((upload, chunks))
    }

    /// Newest first. Returns the total row count alongside the page.
    pub async fn list_uploads(&self, query: PageQuery) -> UploadResult<(i64, Vec<Upload>)> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploads")
            .fetch_one(&*self.db)
            .await?;
        let rows = sqlx::query_as::<_, Upload>(&format!(
            "SELECT {} FROM uploads ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            UPLOAD_COLUMNS
        ))
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(&*self.db)
        .await?;
        Ok((count, rows))
    }

    /// Remove a session and every chunk byte stored for it.
    ///
    /// Not idempotent: a second call returns `UploadNotFound`.
    pub async fn delete_upload(&self, id: Uuid) -> UploadResult<()> {
        let _guard = self.locks.acquire(&id).await;

        let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(UploadError::UploadNotFound(id));
        }

        self.remove_upload_dir(id).await?;
        info!(upload_id = %id, "deleted upload");
        Ok(())
    }

    // --- chunk validator ---

    /// Receive a chunk body into staging, hashing it on the way.
    pub async fn stage_chunk<S>(&self, body: S) -> UploadResult<StagedChunk>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let mut hasher = Sha256::new();
        let file = self
            .media
            .stage_stream(body, |buf| hasher.update(buf))
            .await?;
        Ok(StagedChunk {
            file,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Attach a staged chunk to upload `id` at the position named by `range`.
    ///
    /// The range and the optional declared SHA-256 are checked before
    /// anything is persisted; on any error the staged file is discarded.
    /// A chunk covering exactly the bytes of an earlier one replaces it, a
    /// partial overlap fails with `ChunkOverlap`.
    pub async fn put_chunk(
        &self,
        id: Uuid,
        range: ContentRange,
        staged: StagedChunk,
        declared_sha256: Option<&str>,
    ) -> UploadResult<Upload> {
        let upload = self.fetch_upload(id).await?;
        chunk_validator::validate_range(&range, staged.size(), upload.size)?;
        if let Some(declared) = declared_sha256 {
            chunk_validator::verify_checksum(declared, &staged.sha256)?;
        }

        let _guard = self.locks.acquire(&id).await;

        // Deleted or committed while the body was being received.
        let upload = self.fetch_open_upload(id).await?;
        let existing = self.fetch_chunks(id).await?;
        let placement = chunk_validator::place_chunk(&existing, &range)?;

        let chunk = UploadChunk {
            id: Uuid::new_v4(),
            upload_id: id,
            offset: range.start,
            size: staged.size(),
            sha256: staged.sha256.clone(),
            created_at: Utc::now(),
        };
        let chunk_path = self.media.chunk_path(id, chunk.id);
        staged.file.persist(&chunk_path).await?;

        if let Err(err) = self.insert_chunk(&chunk, placement).await {
            let _ = fs::remove_file(&chunk_path).await;
            return Err(err);
        }

        if let Placement::Replaces(old_id) = placement {
            let old_path = self.media.chunk_path(id, old_id);
            if let Err(err) = fs::remove_file(&old_path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!("failed to remove replaced chunk {}: {}", old_path.display(), err);
                }
            }
        }

        debug!(
            upload_id = %id,
            offset = chunk.offset,
            size = chunk.size,
            replaced = matches!(placement, Placement::Replaces(_)),
            "stored chunk"
        );
        Ok(upload)
    }

    /// Stage and attach an in-memory chunk.
    #[cfg(test)]
    async fn put_chunk_bytes(
        &self,
        id: Uuid,
        range: ContentRange,
        payload: Bytes,
        declared_sha256: Option<&str>,
    ) -> UploadResult<Upload> {
        let staged = self
            .stage_chunk(stream::once(async move { Ok::<_, io::Error>(payload) }))
            .await?;
        self.put_chunk(id, range, staged, declared_sha256).await
    }

    async fn insert_chunk(&self, chunk: &UploadChunk, placement: Placement) -> UploadResult<()> {
        let mut tx = self.db.begin().await?;
        if let Placement::Replaces(old_id) = placement {
            sqlx::query("DELETE FROM upload_chunks WHERE id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO upload_chunks (id, upload_id, chunk_offset, size, sha256, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(chunk.id)
        .bind(chunk.upload_id)
        .bind(chunk.offset)
        .bind(chunk.size)
        .bind(&chunk.sha256)
        .bind(chunk.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // --- commit engine ---

    /// Finalize upload `id` into an artifact.
    ///
    /// Chunks must tile `[0, size)` exactly. They are concatenated in offset
    /// order while every artifact digest is computed; a declared SHA-256 that
    /// disagrees fails the commit. Any failure leaves the session `open` and
    /// unchanged. On success the session and its chunks are gone.
    pub async fn commit_upload(
        &self,
        id: Uuid,
        declared_sha256: Option<&str>,
    ) -> UploadResult<Artifact> {
        let _guard = self.locks.acquire(&id).await;

        let upload = self.begin_commit(id).await?;
        match self.finalize(&upload, declared_sha256).await {
            Ok(artifact) => {
                info!(upload_id = %id, artifact_id = %artifact.id, "committed upload");
                Ok(artifact)
            }
            Err(err) => {
                if let Err(reopen_err) = self.set_state(id, UploadState::Open).await {
                    warn!(upload_id = %id, "failed to reopen upload after commit error: {}", reopen_err);
                }
                debug!(upload_id = %id, "commit failed: {}", err);
                Err(err)
            }
        }
    }

    async fn finalize(&self, upload: &Upload, declared_sha256: Option<&str>) -> UploadResult<Artifact> {
        let chunks = self.fetch_chunks(upload.id).await?;
        chunk_validator::check_coverage(upload.size, &chunks)?;

        let paths = chunks
            .iter()
            .map(|c| self.media.chunk_path(upload.id, c.id))
            .collect::<Vec<_>>();
        let body = stream::iter(paths)
            .then(|path| async move { File::open(path).await.map(ReaderStream::new) })
            .try_flatten();

        let mut hasher = MultiHasher::new();
        let staged = self
            .media
            .stage_stream(body, |buf| hasher.update(buf))
            .await?;
        let digests = hasher.finish();

        if digests.size != upload.size {
            return Err(UploadError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "assembled {} bytes for upload {} of {} bytes",
                    digests.size, upload.id, upload.size
                ),
            )));
        }
        if let Some(declared) = declared_sha256 {
            chunk_validator::verify_checksum(declared, &digests.sha256)?;
        }

        // Retiring the upload is the first write so the transaction holds
        // SQLite's write lock before it reads the artifact table.
        let _digest_guard = self.artifacts.lock_digest(&digests.sha256).await;
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        let registered = self.artifacts.register(&mut *tx, staged, digests).await?;
        if let Err(err) = tx.commit().await {
            self.artifacts.discard(&registered).await;
            return Err(err.into());
        }

        if let Err(err) = self.remove_upload_dir(upload.id).await {
            warn!(upload_id = %upload.id, "committed upload left chunk storage behind: {}", err);
        }
        Ok(registered.artifact)
    }

    /// Atomic `open → committing` transition.
    async fn begin_commit(&self, id: Uuid) -> UploadResult<Upload> {
        sqlx::query_as::<_, Upload>(&format!(
            "UPDATE uploads SET state = ? WHERE id = ? AND state = ? RETURNING {}",
            UPLOAD_COLUMNS
        ))
        .bind(UploadState::Committing)
        .bind(id)
        .bind(UploadState::Open)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(UploadError::UploadNotFound(id))
    }

    async fn set_state(&self, id: Uuid, state: UploadState) -> UploadResult<()> {
        sqlx::query("UPDATE uploads SET state = ? WHERE id = ?")
            .bind(state)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    // --- queries ---

    async fn fetch_upload(&self, id: Uuid) -> UploadResult<Upload> {
        sqlx::query_as::<_, Upload>(&format!(
            "SELECT {} FROM uploads WHERE id = ?",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => UploadError::UploadNotFound(id),
            other => UploadError::Sqlx(other),
        })
    }

    async fn fetch_open_upload(&self, id: Uuid) -> UploadResult<Upload> {
        let upload = self.fetch_upload(id).await?;
        if upload.state != UploadState::Open {
            return Err(UploadError::UploadNotFound(id));
        }
        Ok(upload)
    }

    async fn fetch_chunks(&self, id: Uuid) -> UploadResult<Vec<UploadChunk>> {
        let chunks = sqlx::query_as::<_, UploadChunk>(&format!(
            "SELECT {} FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_offset ASC",
            CHUNK_COLUMNS
        ))
        .bind(id)
        .fetch_all(&*self.db)
        .await?;
        Ok(chunks)
    }

    async fn remove_upload_dir(&self, id: Uuid) -> UploadResult<()> {
        let dir = self.media.upload_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => debug!("removed upload directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(UploadError::Io(err)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, services::digest::sha256_hex};
    use tempfile::TempDir;

    struct Fixture {
        service: UploadService,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let pool = db::connect(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let service = UploadService::new(
            Arc::new(pool),
            MediaLayout::new(dir.path().join("media")),
            1024 * 1024,
        );
        service.recover().await.unwrap();
        Fixture { service, _dir: dir }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn range(start: i64, len: i64, total: i64) -> ContentRange {
        ContentRange::new(start, start + len - 1, Some(total)).unwrap()
    }

    async fn upload_in_order(service: &UploadService, data: &[u8], cuts: &[(usize, usize)]) -> Uuid {
        let total = data.len() as i64;
        let upload = service.create_upload(total).await.unwrap();
        for &(start, end) in cuts {
            service
                .put_chunk_bytes(
                    upload.id,
                    range(start as i64, (end - start) as i64, total),
                    Bytes::copy_from_slice(&data[start..end]),
                    None,
                )
                .await
                .unwrap();
        }
        upload.id
    }

    #[tokio::test]
    async fn create_rejects_invalid_sizes() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service.create_upload(-1).await,
            Err(UploadError::InvalidSize { .. })
        ));
        assert!(matches!(
            fx.service.create_upload(1024 * 1024 + 1).await,
            Err(UploadError::InvalidSize { .. })
        ));
        assert!(fx.service.create_upload(0).await.is_ok());
    }

    #[tokio::test]
    async fn chunks_are_listed_by_offset() {
        let fx = fixture().await;
        let data = payload(100);
        let id = upload_in_order(&fx.service, &data, &[(60, 100), (0, 60)]).await;

        let (upload, chunks) = fx.service.get_upload(id).await.unwrap();
        assert_eq!(upload.size, 100);
        let spans: Vec<_> = chunks.iter().map(|c| (c.offset, c.size)).collect();
        assert_eq!(spans, vec![(0, 60), (60, 40)]);
    }

    #[tokio::test]
    async fn commit_is_independent_of_upload_order() {
        let fx = fixture().await;
        let data = payload(1000);
        let expected = sha256_hex(&data);

        let forward = upload_in_order(&fx.service, &data, &[(0, 300), (300, 700), (700, 1000)]).await;
        let artifact = fx.service.commit_upload(forward, None).await.unwrap();
        assert_eq!(artifact.sha256, expected);
        assert_eq!(artifact.size, 1000);
        let stored = std::fs::read(fx.service.artifacts.artifact_path(&artifact)).unwrap();
        assert_eq!(stored, data);

        let shuffled = upload_in_order(&fx.service, &data, &[(700, 1000), (0, 300), (300, 700)]).await;
        let again = fx
            .service
            .commit_upload(shuffled, Some(&expected))
            .await
            .unwrap();
        assert_eq!(again.id, artifact.id, "same content maps to one artifact");

        assert!(matches!(
            fx.service.get_upload(shuffled).await,
            Err(UploadError::UploadNotFound(_))
        ));
        assert!(!fx.service.media.upload_dir(shuffled).exists());
    }

    #[tokio::test]
    async fn wrong_chunk_checksum_is_not_retained() {
        let fx = fixture().await;
        let data = payload(10);
        let upload = fx.service.create_upload(10).await.unwrap();

        let result = fx
            .service
            .put_chunk_bytes(upload.id, range(0, 10, 10), Bytes::from(data.clone()), Some("WRONG CHECKSUM"))
            .await;
        assert!(matches!(result, Err(UploadError::ChecksumMismatch { .. })));

        let (_, chunks) = fx.service.get_upload(upload.id).await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(std::fs::read_dir(fx.service.media.tmp_dir()).unwrap().count(), 0);

        fx.service
            .put_chunk_bytes(upload.id, range(0, 10, 10), Bytes::from(data.clone()), Some(&sha256_hex(&data)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn out_of_range_chunk_is_rejected() {
        let fx = fixture().await;
        let upload = fx.service.create_upload(10).await.unwrap();
        let result = fx
            .service
            .put_chunk_bytes(
                upload.id,
                ContentRange::new(8, 11, None).unwrap(),
                Bytes::from(payload(4)),
                None,
            )
            .await;
        assert!(matches!(result, Err(UploadError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn same_range_replaces_and_partial_overlap_is_rejected() {
        let fx = fixture().await;
        let upload = fx.service.create_upload(10).await.unwrap();

        fx.service
            .put_chunk_bytes(upload.id, range(0, 5, 10), Bytes::from_static(b"aaaaa"), None)
            .await
            .unwrap();
        fx.service
            .put_chunk_bytes(upload.id, range(0, 5, 10), Bytes::from_static(b"bbbbb"), None)
            .await
            .unwrap();
        let overlap = fx
            .service
            .put_chunk_bytes(upload.id, range(3, 5, 10), Bytes::from_static(b"ccccc"), None)
            .await;
        assert!(matches!(overlap, Err(UploadError::ChunkOverlap { .. })));

        fx.service
            .put_chunk_bytes(upload.id, range(5, 5, 10), Bytes::from_static(b"ddddd"), None)
            .await
            .unwrap();

        let (_, chunks) = fx.service.get_upload(upload.id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        let files = std::fs::read_dir(fx.service.media.upload_dir(upload.id)).unwrap().count();
        assert_eq!(files, 2, "replaced chunk file is removed");

        let artifact = fx.service.commit_upload(upload.id, None).await.unwrap();
        assert_eq!(artifact.sha256, sha256_hex(b"bbbbbddddd"));
    }

    #[tokio::test]
    async fn incomplete_upload_cannot_commit() {
        let fx = fixture().await;
        let upload = fx.service.create_upload(10).await.unwrap();
        fx.service
            .put_chunk_bytes(upload.id, range(0, 4, 10), Bytes::from(payload(4)), None)
            .await
            .unwrap();

        let result = fx.service.commit_upload(upload.id, None).await;
        assert!(matches!(result, Err(UploadError::IncompleteUpload(_))));

        let (upload, chunks) = fx.service.get_upload(upload.id).await.unwrap();
        assert_eq!(upload.state, UploadState::Open);
        assert_eq!(chunks.len(), 1);
        let (count, _) = fx.service.artifacts.list_artifacts(PageQuery::default()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn wrong_commit_checksum_creates_no_artifact() {
        let fx = fixture().await;
        let data = payload(64);
        let id = upload_in_order(&fx.service, &data, &[(0, 64)]).await;

        let result = fx.service.commit_upload(id, Some("0000")).await;
        assert!(matches!(result, Err(UploadError::ChecksumMismatch { .. })));

        let (count, _) = fx.service.artifacts.list_artifacts(PageQuery::default()).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(std::fs::read_dir(fx.service.media.tmp_dir()).unwrap().count(), 0);

        let artifact = fx.service.commit_upload(id, Some(&sha256_hex(&data))).await.unwrap();
        assert_eq!(artifact.size, 64);
    }

    #[tokio::test]
    async fn delete_removes_chunk_storage_once() {
        let fx = fixture().await;
        let id = upload_in_order(&fx.service, &payload(20), &[(0, 10), (10, 20)]).await;
        assert!(fx.service.media.upload_dir(id).exists());

        fx.service.delete_upload(id).await.unwrap();
        assert!(!fx.service.media.upload_dir(id).exists());
        assert!(matches!(
            fx.service.delete_upload(id).await,
            Err(UploadError::UploadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_commits_finalize_once() {
        let fx = fixture().await;
        let data = payload(4096);
        let id = upload_in_order(&fx.service, &data, &[(0, 2048), (2048, 4096)]).await;

        let results = futures::future::join_all(
            (0..4).map(|_| {
                let service = fx.service.clone();
                tokio::spawn(async move { service.commit_upload(id, None).await })
            }),
        )
        .await;

        let outcomes: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, UploadError::UploadNotFound(_))));
    }

    #[tokio::test]
    async fn chunk_after_commit_is_rejected() {
        let fx = fixture().await;
        let data = payload(8);
        let id = upload_in_order(&fx.service, &data, &[(0, 8)]).await;

        let staged = fx
            .service
            .stage_chunk(stream::once(async { Ok::<_, io::Error>(Bytes::from_static(b"late")) }))
            .await
            .unwrap();
        fx.service.commit_upload(id, None).await.unwrap();

        let result = fx.service.put_chunk(id, range(0, 4, 8), staged, None).await;
        assert!(matches!(result, Err(UploadError::UploadNotFound(_))));
        assert!(!fx.service.media.upload_dir(id).exists());
    }

    #[tokio::test]
    async fn recover_reopens_interrupted_commits() {
        let fx = fixture().await;
        let upload = fx.service.create_upload(4).await.unwrap();
        fx.service.begin_commit(upload.id).await.unwrap();
        assert!(fx.service.commit_upload(upload.id, None).await.is_err());

        fx.service.recover().await.unwrap();
        let (upload, _) = fx.service.get_upload(upload.id).await.unwrap();
        assert_eq!(upload.state, UploadState::Open);
    }

    #[tokio::test]
    async fn delete_and_commit_are_exclusive() {
        let fx = fixture().await;
        let data = payload(4096);
        let id = upload_in_order(&fx.service, &data, &[(0, 2048), (2048, 4096)]).await;

        let committer = fx.service.clone();
        let deleter = fx.service.clone();
        let (commit, delete) = tokio::join!(
            tokio::spawn(async move { committer.commit_upload(id, None).await }),
            tokio::spawn(async move { deleter.delete_upload(id).await }),
        );
        let (commit, delete) = (commit.unwrap(), delete.unwrap());

        let (count, _) = fx.service.artifacts.list_artifacts(PageQuery::default()).await.unwrap();
        match (&commit, &delete) {
            (Ok(artifact), Err(UploadError::UploadNotFound(_))) => {
                assert_eq!(count, 1);
                assert_eq!(artifact.sha256, sha256_hex(&data));
            }
            (Err(UploadError::UploadNotFound(_)), Ok(())) => assert_eq!(count, 0),
            other => panic!("exactly one of commit and delete should succeed: {:?}", other),
        }
        assert!(!fx.service.media.upload_dir(id).exists());
        assert!(matches!(
            fx.service.get_upload(id).await,
            Err(UploadError::UploadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_artifact_insert_keeps_the_upload() {
        let fx = fixture().await;
        let data = payload(32);
        let id = upload_in_order(&fx.service, &data, &[(0, 16), (16, 32)]).await;
        sqlx::query(
            "CREATE TRIGGER reject_artifacts BEFORE INSERT ON artifacts
             BEGIN SELECT RAISE(ABORT, 'artifact store offline'); END",
        )
        .execute(&*fx.service.db)
        .await
        .unwrap();

        let result = fx.service.commit_upload(id, None).await;
        assert!(matches!(result, Err(UploadError::Sqlx(_))));

        let (upload, chunks) = fx.service.get_upload(id).await.unwrap();
        assert_eq!(upload.state, UploadState::Open);
        assert_eq!(chunks.len(), 2);
        assert!(fx.service.media.upload_dir(id).exists());
        let artifact_file = fx
            .service
            .media
            .resolve(&MediaLayout::artifact_relative_path(&sha256_hex(&data)));
        assert!(!artifact_file.exists());

        sqlx::query("DROP TRIGGER reject_artifacts")
            .execute(&*fx.service.db)
            .await
            .unwrap();
        let artifact = fx.service.commit_upload(id, None).await.unwrap();
        assert_eq!(artifact.sha256, sha256_hex(&data));
        assert!(!fx.service.media.upload_dir(id).exists());
    }

    #[tokio::test]
    async fn artifact_delete_and_reuse_stay_consistent() {
        let fx = fixture().await;
        let data = payload(2048);

        for _ in 0..5 {
            let first = upload_in_order(&fx.service, &data, &[(0, 2048)]).await;
            let existing = fx.service.commit_upload(first, None).await.unwrap();
            let second = upload_in_order(&fx.service, &data, &[(0, 1024), (1024, 2048)]).await;

            let committer = fx.service.clone();
            let artifacts = fx.service.artifacts.clone();
            let (committed, deleted) = tokio::join!(
                tokio::spawn(async move { committer.commit_upload(second, None).await }),
                tokio::spawn(async move { artifacts.delete_artifact(existing.id).await }),
            );
            committed.unwrap().unwrap();
            deleted.unwrap().unwrap();

            let (_, rows) = fx
                .service
                .artifacts
                .list_artifacts(PageQuery::default())
                .await
                .unwrap();
            assert!(rows.len() <= 1);
            for artifact in &rows {
                let stored = std::fs::read(fx.service.artifacts.artifact_path(artifact)).unwrap();
                assert_eq!(stored, data, "artifact row without its payload");
            }
        }
    }
}
