use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, comments, posts};

/// Request body cap for the multipart image routes. Other routes keep axum's
/// default.
pub const MAX_IMAGE_FORM_BYTES: usize = 16 * 1024 * 1024;

/// All API routes. Reads of posts, comments and search are public; anything
/// that writes or acts as a user goes through [`require_auth`].
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(health))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/reset-password-request", post(auth::request_reset))
        .route("/reset-password", post(auth::confirm_reset))
        .route("/posts", get(posts::list_posts))
        .route("/posts/{post_id}", get(posts::get_post))
        .route("/posts/{post_id}/comments", get(comments::list_comments))
        .route("/search", get(posts::search_posts))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/users/profile", get(auth::profile))
        .route("/users/change-password", post(auth::change_password))
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}", put(posts::update_post).delete(posts::delete_post))
        .route(
            "/posts/with-image",
            post(posts::create_post_form).layer(DefaultBodyLimit::max(MAX_IMAGE_FORM_BYTES)),
        )
        .route(
            "/posts/{post_id}/form",
            put(posts::update_post_form).layer(DefaultBodyLimit::max(MAX_IMAGE_FORM_BYTES)),
        )
        .route("/posts/{post_id}/vote", post(posts::vote_post))
        .route("/comments", post(comments::create_comment))
        .route("/comments/{comment_id}/vote", post(comments::vote_comment))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the DevIT API",
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
