pub mod auth;
pub mod clock;
pub mod comments;
pub mod content;
pub mod credentials;
pub mod error;
pub mod images;
pub mod middleware;
pub mod posts;
pub mod routes;
pub mod session;
pub mod state;
pub mod tokens;
pub mod views;
pub mod votes;

use tracing::error;

use crate::error::ApiError;

pub use routes::router;
pub use state::{AppState, AppStateInner};

/// Run blocking store or Argon2 work off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("blocking task failed"))
    })?
}
