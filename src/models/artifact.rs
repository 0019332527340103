//! Represents a committed, content-addressed artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An immutable byte stream produced by committing an upload.
///
/// Artifacts are addressed by their SHA-256; the payload is stored at
/// `artifact/{sha256[0..2]}/{sha256[2..]}` under the media root and `file`
/// holds that relative path.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Artifact {
    pub id: Uuid,

    /// Payload path relative to the media root.
    pub file: String,

    pub size: i64,

    pub md5: String,
    pub sha224: String,
    pub sha256: String,
    pub sha384: String,
    pub sha512: String,

    pub created_at: DateTime<Utc>,
}

/// Wire shape of an artifact.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ArtifactResponse {
    pub _href: String,
    pub _created: DateTime<Utc>,
    pub file: String,
    pub size: i64,
    pub md5: String,
    pub sha224: String,
    pub sha256: String,
    pub sha384: String,
    pub sha512: String,
}

impl Artifact {
    pub fn href(&self, api_root: &str) -> String {
        artifact_href(api_root, self.id)
    }

    pub fn to_response(&self, api_root: &str) -> ArtifactResponse {
        ArtifactResponse {
            _href: self.href(api_root),
            _created: self.created_at,
            file: self.file.clone(),
            size: self.size,
            md5: self.md5.clone(),
            sha224: self.sha224.clone(),
            sha256: self.sha256.clone(),
            sha384: self.sha384.clone(),
            sha512: self.sha512.clone(),
        }
    }
}

pub fn artifact_href(api_root: &str, id: Uuid) -> String {
    format!("{}/artifacts/{}/", api_root, id)
}
