use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use devit_types::api::{
    CreatePostRequest, ListPostsQuery, PostResponse, ReactableResponse, SearchQuery,
    StatusMessage, UpdatePostRequest, VoteRequest, VoteResponse,
};
use devit_types::models::ReactableKind;

use crate::content::{PostDraft, PostEdit};
use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::run_blocking;
use crate::state::AppState;
use crate::views::{post_response, vote_response};

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let posts = run_blocking(move || state.content.list_posts(&query)).await?;
    Ok(Json(posts.iter().map(post_response).collect()))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = run_blocking(move || state.content.get_post(post_id)).await?;
    Ok(Json(post_response(&post)))
}

pub async fn search_posts(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let posts = run_blocking(move || state.content.search_posts(&query.query)).await?;
    Ok(Json(posts.iter().map(post_response).collect()))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = PostDraft::from_json(req)?;
    let post = state.content.create_post(&user, draft).await?;
    Ok((StatusCode::CREATED, Json(post_response(&post))))
}

/// `multipart/form-data` variant of [`create_post`]: `title`, `content`,
/// optional `author` and an optional `image` file sent as raw bytes.
pub async fn create_post_form(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = PostForm::read(multipart).await?;
    let draft = PostDraft {
        title: form.title.ok_or_else(|| missing_field("title"))?,
        content: form.content.ok_or_else(|| missing_field("content"))?,
        author: form.author,
        image_url: None,
        image: form.image,
    };

    let post = state.content.create_post(&user, draft).await?;
    Ok((StatusCode::CREATED, Json(post_response(&post))))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    let edit = PostEdit::from_json(req)?;
    let post = state.content.update_post(user.id, post_id, edit).await?;
    Ok(Json(post_response(&post)))
}

/// `multipart/form-data` variant of [`update_post`]: optional `title`,
/// `content`, `image` file and `remove_image` flag.
pub async fn update_post_form(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Multipart,
) -> Result<Json<PostResponse>, ApiError> {
    let form = PostForm::read(multipart).await?;
    let edit = PostEdit {
        title: form.title,
        content: form.content,
        image_url: None,
        image: form.image,
        remove_image: form.remove_image,
    };

    let post = state.content.update_post(user.id, post_id, edit).await?;
    Ok(Json(post_response(&post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<StatusMessage>, ApiError> {
    run_blocking(move || state.content.delete_post(user.id, post_id)).await?;
    Ok(Json(StatusMessage::new("Post deleted successfully")))
}

pub async fn vote_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse<ReactableResponse>>, ApiError> {
    let outcome = run_blocking(move || {
        state
            .votes
            .apply_vote(ReactableKind::Post, post_id, user.id, &req.vote_type)
    })
    .await?;
    Ok(Json(vote_response(&outcome)))
}

#[derive(Debug, Default)]
struct PostForm {
    title: Option<String>,
    content: Option<String>,
    author: Option<String>,
    image: Option<Vec<u8>>,
    remove_image: bool,
}

impl PostForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "title" => form.title = Some(field.text().await.map_err(bad_form)?),
                "content" => form.content = Some(field.text().await.map_err(bad_form)?),
                "author" => form.author = Some(field.text().await.map_err(bad_form)?),
                "remove_image" => {
                    let flag = field.text().await.map_err(bad_form)?;
                    form.remove_image = matches!(flag.trim(), "true" | "1" | "on");
                }
                "image" => {
                    let bytes = field.bytes().await.map_err(bad_form)?;
                    // Browsers send an empty part when no file was picked.
                    if !bytes.is_empty() {
                        form.image = Some(bytes.to_vec());
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }
}

fn bad_form(e: MultipartError) -> ApiError {
    ApiError::InvalidArgument(format!("invalid form data: {}", e.body_text()))
}

fn missing_field(name: &str) -> ApiError {
    ApiError::InvalidArgument(format!("{name} is required"))
}
