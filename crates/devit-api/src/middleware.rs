use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use devit_types::models::User;

use crate::error::{ApiError, INVALID_TOKEN};
use crate::run_blocking;
use crate::state::AppState;

/// The account behind the request's access token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Resolve the `Authorization: Bearer` token to an account and attach it as
/// a [`CurrentUser`] extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated(INVALID_TOKEN))?
        .to_string();

    let user = run_blocking(move || state.sessions.get_current_user(&token)).await?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
