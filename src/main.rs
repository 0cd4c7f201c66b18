// Live Articles Server

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use live_articles::{api::create_router, app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("live_articles=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    prepare_data_dirs(&config).await?;

    let app_state = AppState::new(config.clone()).await?;
    let app = create_router(app_state);

    let addr = config.server_address();
    info!("Live Articles server starting on http://{}", addr);
    info!("Serving uploads from {}", config.storage.upload_dir.display());

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Make sure the upload directory and the SQLite file's directory exist.
async fn prepare_data_dirs(config: &Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.storage.upload_dir).await?;

    let path = config
        .database
        .url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if !path.is_empty() && !path.starts_with(":memory:") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }
    Ok(())
}
