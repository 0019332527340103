use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024 * 1024;
const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub media_root: PathBuf,
    pub database_url: String,
    /// Prefix under which the upload and artifact API is mounted, without a
    /// trailing slash. Empty means the server root.
    pub api_root: String,
    /// Largest `size` accepted when creating an upload.
    pub max_upload_size: u64,
    /// Request body limit applied to chunk uploads.
    pub max_chunk_size: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked upload and artifact API")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding chunk and artifact payloads (overrides UPLOAD_STORE_MEDIA_ROOT)
    #[arg(long)]
    pub media_root: Option<PathBuf>,

    /// Database URL (overrides UPLOAD_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// API mount point, e.g. /pulp/api/v3 (overrides UPLOAD_STORE_API_ROOT)
    #[arg(long)]
    pub api_root: Option<String>,

    /// Maximum declared upload size in bytes (overrides UPLOAD_STORE_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Maximum chunk request body in bytes (overrides UPLOAD_STORE_MAX_CHUNK_SIZE)
    #[arg(long)]
    pub max_chunk_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("UPLOAD_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("UPLOAD_STORE_PORT", 3000u16)?;
        let env_media = env::var("UPLOAD_STORE_MEDIA_ROOT").unwrap_or_else(|_| "./data/media".into());
        let env_db = env::var("UPLOAD_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/upload_store.db".into());
        let env_api_root =
            env::var("UPLOAD_STORE_API_ROOT").unwrap_or_else(|_| "/pulp/api/v3".into());
        let env_max_upload = parse_env("UPLOAD_STORE_MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE)?;
        let env_max_chunk = parse_env("UPLOAD_STORE_MAX_CHUNK_SIZE", DEFAULT_MAX_CHUNK_SIZE)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            media_root: args.media_root.unwrap_or_else(|| PathBuf::from(env_media)),
            database_url: args.database_url.unwrap_or(env_db),
            api_root: normalize_api_root(&args.api_root.unwrap_or(env_api_root)),
            max_upload_size: args.max_upload_size.unwrap_or(env_max_upload),
            max_chunk_size: args.max_chunk_size.unwrap_or(env_max_chunk),
        };

        Ok((cfg, args.migrate))
    }

    /// Configuration rooted at `media_root`, with a SQLite file next to the
    /// payloads. Used by tests and embedders that do not read the environment.
    pub fn local(media_root: impl Into<PathBuf>) -> Self {
        let media_root = media_root.into();
        let database_url = format!("sqlite://{}", media_root.join("meta.db").display());
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            media_root,
            database_url,
            api_root: "/pulp/api/v3".into(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Strip trailing slashes and make sure a non-empty root starts with `/`.
pub fn normalize_api_root(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_root_is_normalized() {
        assert_eq!(normalize_api_root("/pulp/api/v3/"), "/pulp/api/v3");
        assert_eq!(normalize_api_root("pulp/api/v3"), "/pulp/api/v3");
        assert_eq!(normalize_api_root("/"), "");
        assert_eq!(normalize_api_root(""), "");
    }

    #[test]
    fn local_config_keeps_database_under_media_root() {
        let cfg = AppConfig::local("/tmp/store");
        assert_eq!(cfg.database_url, "sqlite:///tmp/store/meta.db");
        assert_eq!(cfg.api_root, "/pulp/api/v3");
    }
}
