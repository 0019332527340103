//! On-disk layout under the media root and staged (not yet placed) files.
//!
//! ```text
//! {root}/upload/{upload_id}/{chunk_id}          chunk payloads
//! {root}/artifact/{sha256[0..2]}/{sha256[2..]}  artifact payloads
//! {root}/tmp/{uuid}                             staging files
//! ```

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const UPLOAD_DIR: &str = "upload";
const ARTIFACT_DIR: &str = "artifact";
const TMP_DIR: &str = "tmp";

#[derive(Clone, Debug)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding every chunk of one upload.
    pub fn upload_dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(UPLOAD_DIR).join(upload_id.to_string())
    }

    pub fn chunk_path(&self, upload_id: Uuid, chunk_id: Uuid) -> PathBuf {
        self.upload_dir(upload_id).join(chunk_id.to_string())
    }

    /// Path of an artifact payload relative to the root.
    pub fn artifact_relative_path(sha256: &str) -> String {
        let (shard, rest) = sha256.split_at(2.min(sha256.len()));
        format!("{}/{}/{}", ARTIFACT_DIR, shard, rest)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.root.join(ARTIFACT_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Create the top-level directories.
    pub async fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [UPLOAD_DIR, ARTIFACT_DIR, TMP_DIR] {
            fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    /// Drop leftovers of requests interrupted by a crash.
    pub async fn clear_staging(&self) -> io::Result<usize> {
        let tmp = self.tmp_dir();
        let mut removed = 0;
        let mut entries = match fs::read_dir(&tmp).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            match fs::remove_file(entry.path()).await {
                Ok(_) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    /// Write `stream` to a fresh staging file, passing every buffer to
    /// `observe` on the way (used for hashing).
    ///
    /// The file is fsynced before returning. On any error the partial file is
    /// removed.
    pub async fn stage_stream<S, F>(&self, stream: S, mut observe: F) -> io::Result<StagedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
        F: FnMut(&[u8]),
    {
        let tmp = self.tmp_dir();
        fs::create_dir_all(&tmp).await?;
        let mut staged = StagedFile {
            path: tmp.join(Uuid::new_v4().to_string()),
            size: 0,
            armed: true,
        };
        let mut file = File::create(&staged.path).await?;

        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            observe(&chunk);
            file.write_all(&chunk).await?;
            staged.size += chunk.len() as i64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(staged)
    }

    /// Recursively remove empty directories from `start` up to (not
    /// including) `stop`.
    pub async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// A fully written staging file.
///
/// Owns the file until [`StagedFile::persist`] moves it into place; dropping
/// it earlier deletes it, so failed requests leave nothing behind.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    size: i64,
    armed: bool,
}

impl StagedFile {
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the file to `dest`, creating parent directories as needed.
    /// An existing file at `dest` is replaced.
    pub async fn persist(mut self, dest: &Path) -> io::Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(err) = fs::rename(&self.path, dest).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(dest).await?;
                fs::rename(&self.path, dest).await?;
            } else {
                return Err(err);
            }
        }
        self.armed = false;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    debug!("failed to remove staged file {}: {}", self.path.display(), err);
                }
            }
        }
    }
}
