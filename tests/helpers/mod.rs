//! Test helpers: build the application over a temporary media root.

#![allow(dead_code)]

use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tempfile::TempDir;
use upload_store::{config::AppConfig, routes::routes, state::AppState};

/// Where the API is mounted in tests.
pub const API_ROOT: &str = "/pulp/api/v3";

/// Size of the file split into chunks, and of its first chunk.
pub const FILE_SIZE: usize = 10_485_760;
pub const FIRST_CHUNK_SIZE: usize = 6_291_456;

pub fn api_path(path: &str) -> String {
    format!("{}{}", API_ROOT, path)
}

/// Test application: server plus the directory backing it.
pub struct TestApp {
    pub server: TestServer,
    pub media_root: PathBuf,
    _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// On-disk directory holding the chunks of the upload at `href`.
    pub fn upload_dir(&self, href: &str) -> PathBuf {
        let name = href
            .trim_start_matches(&api_path("/uploads/"))
            .trim_end_matches('/');
        self.media_root.join("upload").join(name)
    }

    pub fn media_path(&self, relative: &str) -> PathBuf {
        self.media_root.join(relative)
    }
}

pub async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let media_root = temp_dir.path().join("media");
    let mut config = AppConfig::local(&media_root);
    config.database_url = format!("sqlite://{}", temp_dir.path().join("meta.db").display());
    config.api_root = API_ROOT.to_string();

    let state = AppState::from_config(&config)
        .await
        .expect("Failed to build app state");
    let app = routes::app(state);
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        media_root,
        _temp_dir: temp_dir,
    }
}

/// Deterministic stand-in for the file that gets uploaded in chunks.
pub fn file_to_chunk() -> Vec<u8> {
    (0..FILE_SIZE)
        .map(|i| ((i * 2654435761usize) >> 13) as u8)
        .collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A chunk of a larger file together with its `Content-Range` header.
pub struct Chunk {
    pub data: Vec<u8>,
    pub content_range: String,
}

/// Split `file` at `FIRST_CHUNK_SIZE` and return the two chunks second-first,
/// so every upload exercises out-of-order arrival.
pub fn chunked_data(file: &[u8]) -> Vec<Chunk> {
    let total = file.len();
    let (first, second) = file.split_at(FIRST_CHUNK_SIZE);
    vec![
        Chunk {
            data: second.to_vec(),
            content_range: format!("bytes {}-{}/{}", FIRST_CHUNK_SIZE, total - 1, total),
        },
        Chunk {
            data: first.to_vec(),
            content_range: format!("bytes 0-{}/{}", FIRST_CHUNK_SIZE - 1, total),
        },
    ]
}

pub fn chunk_form(chunk: &Chunk, sha256: Option<&str>) -> MultipartForm {
    let part = Part::bytes(bytes::Bytes::from(chunk.data.clone()))
        .file_name("chunk")
        .mime_type("application/octet-stream");
    let form = MultipartForm::new().add_part("file", part);
    match sha256 {
        Some(sha256) => form.add_text("sha256", sha256.to_string()),
        None => form,
    }
}

/// Keys of a JSON object in the order they appear in `body`.
pub fn top_level_keys(body: &str) -> Vec<String> {
    let value: serde_json::Value = serde_json::from_str(body).expect("JSON body");
    let mut keys: Vec<(usize, String)> = value
        .as_object()
        .expect("JSON object")
        .keys()
        .map(|k| {
            let needle = format!("\"{}\":", k);
            (body.find(&needle).expect("key present in body"), k.clone())
        })
        .collect();
    keys.sort();
    keys.into_iter().map(|(_, k)| k).collect()
}
