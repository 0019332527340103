//! Upload session, chunk validation, commit and artifact services.

pub mod artifact_service;
pub mod chunk_validator;
pub mod digest;
pub mod media;
pub mod session_locks;
pub mod upload_service;

use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload `{0}` not found")]
    UploadNotFound(Uuid),
    #[error("artifact `{0}` not found")]
    ArtifactNotFound(Uuid),
    #[error("invalid upload size {size}: must be between 0 and {max} bytes")]
    InvalidSize { size: i64, max: u64 },
    #[error("bytes {start}-{end} are outside the upload of {size} bytes")]
    OutOfRange { start: i64, end: i64, size: i64 },
    #[error("invalid Content-Range: {0}")]
    InvalidContentRange(String),
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("chunk at bytes {start}-{end} overlaps the chunk at bytes {existing_start}-{existing_end}")]
    ChunkOverlap {
        start: i64,
        end: i64,
        existing_start: i64,
        existing_end: i64,
    },
    #[error("upload is incomplete: {0}")]
    IncompleteUpload(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UploadError {
    /// Validation failures are the caller's fault and never mutate state.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Sqlx(_) | UploadError::Io(_))
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
