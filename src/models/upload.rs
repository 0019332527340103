//! Upload sessions and the chunks received for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an upload session.
///
/// Sessions are created `open`; commit moves them to `committing` while it
/// validates and assembles the chunks. A successful commit deletes the row,
/// a failed one puts it back to `open`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Open,
    Committing,
}

/// An upload session row.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Upload {
    /// Server generated identifier, also the name of the chunk directory.
    pub id: Uuid,

    /// Declared total size in bytes. Immutable once created.
    pub size: i64,

    pub state: UploadState,

    pub created_at: DateTime<Utc>,
}

/// A received chunk. The payload lives at `upload/{upload_id}/{id}` under the
/// media root.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadChunk {
    pub id: Uuid,

    pub upload_id: Uuid,

    /// Byte offset of the first byte of this chunk within the upload.
    #[sqlx(rename = "chunk_offset")]
    pub offset: i64,

    /// Number of bytes in this chunk (always > 0).
    pub size: i64,

    /// SHA-256 of the payload computed on receipt.
    pub sha256: String,

    pub created_at: DateTime<Utc>,
}

impl UploadChunk {
    /// Exclusive end of the byte range covered by this chunk.
    pub fn end(&self) -> i64 {
        self.offset + self.size
    }
}

/// Body of `POST /uploads/`.
#[derive(Debug, Deserialize)]
pub struct CreateUploadReq {
    pub size: i64,
}

/// Body of `POST /uploads/{id}/commit/`.
#[derive(Debug, Default, Deserialize)]
pub struct CommitUploadReq {
    pub sha256: Option<String>,
}

/// Wire shape returned by create and chunk upload. Field order is part of
/// the contract.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadResponse {
    pub _href: String,
    pub _created: DateTime<Utc>,
    pub size: i64,
}

/// Wire shape returned by `GET /uploads/{id}/`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadDetailResponse {
    pub _href: String,
    pub _created: DateTime<Utc>,
    pub size: i64,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    pub offset: i64,
    pub size: i64,
}

impl Upload {
    pub fn href(&self, api_root: &str) -> String {
        upload_href(api_root, self.id)
    }

    pub fn to_response(&self, api_root: &str) -> UploadResponse {
        UploadResponse {
            _href: self.href(api_root),
            _created: self.created_at,
            size: self.size,
        }
    }

    /// Render with the given chunks, which must already be sorted by offset.
    pub fn to_detail(&self, api_root: &str, chunks: &[UploadChunk]) -> UploadDetailResponse {
        UploadDetailResponse {
            _href: self.href(api_root),
            _created: self.created_at,
            size: self.size,
            chunks: chunks
                .iter()
                .map(|c| ChunkResponse {
                    offset: c.offset,
                    size: c.size,
                })
                .collect(),
        }
    }
}

pub fn upload_href(api_root: &str, id: Uuid) -> String {
    format!("{}/uploads/{}/", api_root, id)
}
