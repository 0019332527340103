use anyhow::Result;
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use upload_store::{config::AppConfig, db, routes::routes, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-store with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        let pool = db::connect(&cfg.database_url).await?;
        db::run_migrations(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize services (schema, media root, crash recovery) ---
    let state = AppState::from_config(&cfg).await?;
    tracing::info!(
        media_root = %cfg.media_root.display(),
        api_root = %cfg.api_root,
        "Upload service ready"
    );

    let app = routes::app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
