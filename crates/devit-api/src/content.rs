use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::info;
use uuid::Uuid;

use devit_db::queries::PostChanges;
use devit_db::{Database, ReactableRepository};
use devit_types::api::{CreateCommentRequest, CreatePostRequest, ListPostsQuery, UpdatePostRequest};
use devit_types::models::{Comment, Post, PostSort, ReactableKind, User, VoteTally};

use crate::clock::Clock;
use crate::error::ApiError;
use crate::images::ImageStore;
use crate::run_blocking;

const MAX_PAGE_SIZE: u32 = 100;
const MIN_SEARCH_LEN: usize = 3;

/// A new post. `image` holds raw bytes bound for the image host.
#[derive(Debug, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl PostDraft {
    pub fn from_json(req: CreatePostRequest) -> Result<Self, ApiError> {
        Ok(Self {
            image: decode_image(req.image)?,
            title: req.title,
            content: req.content,
            author: req.author,
            image_url: req.image_url,
        })
    }
}

/// Changes to an existing post. A new `image` wins over `image_url`, which
/// wins over `remove_image`.
#[derive(Debug, Default)]
pub struct PostEdit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub image: Option<Vec<u8>>,
    pub remove_image: bool,
}

impl PostEdit {
    pub fn from_json(req: UpdatePostRequest) -> Result<Self, ApiError> {
        Ok(Self {
            image: decode_image(req.image)?,
            title: req.title,
            content: req.content,
            image_url: req.image_url,
            remove_image: req.remove_image,
        })
    }
}

fn decode_image(encoded: Option<String>) -> Result<Option<Vec<u8>>, ApiError> {
    encoded
        .map(|e| {
            B64.decode(e)
                .map_err(|_| ApiError::InvalidArgument("image is not valid base64".into()))
        })
        .transpose()
}

/// Posts, comments and search. Image uploads happen before any row is
/// written, so a failed upload leaves nothing behind.
pub struct ContentService {
    db: Arc<Database>,
    images: Arc<dyn ImageStore>,
    clock: Arc<dyn Clock>,
}

impl ContentService {
    pub fn new(db: Arc<Database>, images: Arc<dyn ImageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { db, images, clock }
    }

    // -- Posts --

    pub fn list_posts(&self, query: &ListPostsQuery) -> Result<Vec<Post>, ApiError> {
        let sort = PostSort::from_query(query.sort.as_deref());
        Ok(self.db.list_posts(sort, query.skip, query.limit.min(MAX_PAGE_SIZE))?)
    }

    pub fn get_post(&self, id: Uuid) -> Result<Post, ApiError> {
        self.db
            .get_post(id)?
            .ok_or_else(|| ApiError::NotFound("Post not found".into()))
    }

    pub async fn create_post(&self, author: &User, req: PostDraft) -> Result<Post, ApiError> {
        let image_url = match req.image {
            Some(bytes) => Some(self.upload_image(bytes).await?),
            None => req.image_url,
        };

        let post = Post {
            id: Uuid::new_v4(),
            title: req.title,
            content: req.content,
            author: req
                .author
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| author.username.clone()),
            user_id: author.id,
            image_url,
            tally: VoteTally::default(),
            comments_count: 0,
            created_at: self.clock.now(),
        };

        let db = self.db.clone();
        let row = post.clone();
        run_blocking(move || Ok(db.insert_post(&row)?)).await?;

        info!(post_id = %post.id, user_id = %author.id, "post created");
        Ok(post)
    }

    /// Only the post's owner may edit it. Ownership is checked before any
    /// image is uploaded.
    pub async fn update_post(
        &self,
        actor: Uuid,
        id: Uuid,
        req: PostEdit,
    ) -> Result<Post, ApiError> {
        let db = self.db.clone();
        let existing = run_blocking(move || {
            db.get_post(id)?
                .ok_or_else(|| ApiError::NotFound("Post not found".into()))
        })
        .await?;
        ensure_owner(&existing, actor, "You can only edit your own posts")?;

        let image_url = match (req.image, req.image_url) {
            (Some(bytes), _) => Some(Some(self.upload_image(bytes).await?)),
            (None, Some(url)) => Some(Some(url)),
            (None, None) if req.remove_image => Some(None),
            (None, None) => None,
        };
        let changes = PostChanges {
            title: req.title,
            content: req.content,
            image_url,
        };

        let db = self.db.clone();
        run_blocking(move || {
            if !changes.is_empty() {
                db.update_post(id, &changes)?;
            }
            db.get_post(id)?
                .ok_or_else(|| ApiError::NotFound("Post not found".into()))
        })
        .await
    }

    /// Delete a post and all of its comments. Owner only.
    pub fn delete_post(&self, actor: Uuid, id: Uuid) -> Result<(), ApiError> {
        let post = self.get_post(id)?;
        ensure_owner(&post, actor, "You can only delete your own posts")?;

        if !self.db.delete_reactable(ReactableKind::Post, id)? {
            return Err(ApiError::NotFound("Post not found".into()));
        }
        info!(post_id = %id, user_id = %actor, "post deleted");
        Ok(())
    }

    pub fn search_posts(&self, query: &str) -> Result<Vec<Post>, ApiError> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Err(ApiError::InvalidArgument(
                "Search query must be at least 3 characters long".into(),
            ));
        }
        Ok(self.db.search_posts(query)?)
    }

    // -- Comments --

    pub fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>, ApiError> {
        Ok(self.db.list_comments(post_id)?)
    }

    pub fn create_comment(&self, author: &User, req: CreateCommentRequest) -> Result<Comment, ApiError> {
        if self.db.get_post(req.post_id)?.is_none() {
            return Err(ApiError::NotFound("Post not found".into()));
        }

        let comment = Comment {
            id: Uuid::new_v4(),
            post_id: req.post_id,
            text: req.text,
            username: author.username.clone(),
            user_id: Some(author.id),
            tally: VoteTally::default(),
            created_at: self.clock.now(),
        };
        self.db.insert_comment(&comment)?;

        Ok(comment)
    }

    async fn upload_image(&self, bytes: Vec<u8>) -> Result<String, ApiError> {
        if bytes.is_empty() {
            return Err(ApiError::InvalidArgument("image is empty".into()));
        }
        Ok(self.images.upload(bytes).await?)
    }
}

fn ensure_owner(post: &Post, actor: Uuid, message: &str) -> Result<(), ApiError> {
    if post.user_id != actor {
        return Err(ApiError::Forbidden(message.into()));
    }
    Ok(())
}
