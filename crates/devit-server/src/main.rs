mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use devit_api::clock::SystemClock;
use devit_api::credentials::CredentialStore;
use devit_api::images::ImgbbStore;
use devit_api::{AppStateInner, router};
use devit_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devit=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let images = Arc::new(ImgbbStore::new(
        config.imgbb_url.clone(),
        config.imgbb_api_keys.clone(),
        config.upload_timeout,
    )?);

    let state = AppStateInner::new(
        db,
        &config.jwt_secret,
        CredentialStore::new(),
        images,
        Arc::new(SystemClock),
    );

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("DevIT API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
