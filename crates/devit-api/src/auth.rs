use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use devit_types::api::{
    LoginRequest, PasswordChangeRequest, PasswordResetConfirm, PasswordResetRequest,
    RefreshRequest, RegisterRequest, StatusMessage, TokenResponse, UserProfile,
};

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::run_blocking;
use crate::state::AppState;
use crate::views::user_profile;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidArgument(
            "username, email and password are required".into(),
        ));
    }

    let tokens = run_blocking(move || {
        state
            .sessions
            .register(&req.username, &req.email, &req.password)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(tokens)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let tokens = run_blocking(move || state.sessions.login(&req.identifier, &req.password)).await?;
    Ok(Json(tokens))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let tokens = run_blocking(move || state.sessions.refresh(&req.refresh_token)).await?;
    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<StatusMessage>, ApiError> {
    let msg = run_blocking(move || state.sessions.logout(user.id)).await?;
    Ok(Json(msg))
}

pub async fn profile(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<UserProfile> {
    Json(user_profile(&user))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<PasswordChangeRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let msg = run_blocking(move || {
        state
            .sessions
            .change_password(user.id, &req.current_password, &req.new_password)
    })
    .await?;
    Ok(Json(msg))
}

pub async fn request_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> Result<Json<StatusMessage>, ApiError> {
    let msg = run_blocking(move || state.sessions.request_password_reset(&req.email)).await?;
    Ok(Json(msg))
}

pub async fn confirm_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetConfirm>,
) -> Result<Json<StatusMessage>, ApiError> {
    let msg = run_blocking(move || {
        state
            .sessions
            .confirm_password_reset(&req.email, &req.reset_code, &req.new_password)
    })
    .await?;
    Ok(Json(msg))
}
