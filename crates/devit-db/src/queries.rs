use crate::models::{
    CommentRow, PostRow, UserRow, encode_voters, format_timestamp,
};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use devit_types::models::{Comment, Post, PostSort, User};

const USER_COLUMNS: &str = "id, username, email, password, karma, bio, reset_code, \
     reset_code_expiry, refresh_token_hash, created_at";

const POST_SELECT: &str = "SELECT p.id, p.title, p.content, p.author, p.user_id, p.image_url, \
     p.upvotes, p.downvotes, p.voters, \
     (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id), p.created_at \
     FROM posts p";

const COMMENT_SELECT: &str = "SELECT id, post_id, text, username, user_id, upvotes, downvotes, \
     voters, created_at FROM comments";

/// Field changes for a post edit. `image_url: Some(None)` clears the image.
#[derive(Debug, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<Option<String>>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.image_url.is_none()
    }
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, karma, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    user.password_hash,
                    user.karma,
                    user.bio,
                    format_timestamp(user.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn update_refresh_token_hash(&self, id: Uuid, hash: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET refresh_token_hash = ?2 WHERE id = ?1",
                params![id.to_string(), hash],
            )?;
            Ok(())
        })
    }

    /// Replace the refresh-token digest only if it still equals `expected`.
    pub fn compare_and_swap_refresh_token_hash(
        &self,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET refresh_token_hash = ?3 WHERE id = ?1 AND refresh_token_hash = ?2",
                params![id.to_string(), expected, new],
            )?;
            Ok(changed == 1)
        })
    }

    /// Replace the password hash only if it still equals `expected`.
    pub fn compare_and_swap_password(&self, id: Uuid, expected: &str, new: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?3 WHERE id = ?1 AND password = ?2",
                params![id.to_string(), expected, new],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn store_reset_code(&self, id: Uuid, code: &str, expiry: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET reset_code = ?2, reset_code_expiry = ?3 WHERE id = ?1",
                params![id.to_string(), code, format_timestamp(expiry)],
            )?;
            Ok(())
        })
    }

    /// Set a new password and clear the pending code, provided `code` is still
    /// the pending one. Two confirmations racing on one code: only one lands.
    pub fn redeem_reset_code(&self, id: Uuid, code: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET password = ?3, reset_code = NULL, reset_code_expiry = NULL
                 WHERE id = ?1 AND reset_code = ?2",
                params![id.to_string(), code, password_hash],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Posts --

    pub fn insert_post(&self, post: &Post) -> Result<()> {
        let voters = encode_voters(&post.tally.voters)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts
                 (id, title, content, author, user_id, image_url, upvotes, downvotes, voters, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    post.id.to_string(),
                    post.title,
                    post.content,
                    post.author,
                    post.user_id.to_string(),
                    post.image_url,
                    post.tally.upvotes,
                    post.tally.downvotes,
                    voters,
                    format_timestamp(post.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    pub fn list_posts(&self, sort: PostSort, skip: u32, limit: u32) -> Result<Vec<Post>> {
        let order = match sort {
            PostSort::Newest => "p.created_at DESC",
            PostSort::Oldest => "p.created_at ASC",
            PostSort::MostUpvoted => "p.upvotes DESC, p.created_at DESC",
            PostSort::MostDownvoted => "p.downvotes DESC, p.created_at DESC",
        };
        let sql = format!("{POST_SELECT} ORDER BY {order} LIMIT ?1 OFFSET ?2");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit, skip], post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(PostRow::into_model).collect()
        })
    }

    /// Case-insensitive (ASCII) substring match on title, content or author,
    /// newest first.
    pub fn search_posts(&self, needle: &str) -> Result<Vec<Post>> {
        let pattern = format!("%{}%", escape_like(needle));
        let sql = format!(
            "{POST_SELECT}
             WHERE p.title LIKE ?1 ESCAPE '\\'
                OR p.content LIKE ?1 ESCAPE '\\'
                OR p.author LIKE ?1 ESCAPE '\\'
             ORDER BY p.created_at DESC"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([pattern], post_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(PostRow::into_model).collect()
        })
    }

    pub fn update_post(&self, id: Uuid, changes: &PostChanges) -> Result<()> {
        let (set_image, image_url) = match &changes.image_url {
            Some(url) => (true, url.clone()),
            None => (false, None),
        };
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE posts
                 SET title = COALESCE(?2, title),
                     content = COALESCE(?3, content),
                     image_url = CASE WHEN ?4 THEN ?5 ELSE image_url END
                 WHERE id = ?1",
                params![id.to_string(), changes.title, changes.content, set_image, image_url],
            )?;
            Ok(())
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let voters = encode_voters(&comment.tally.voters)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments
                 (id, post_id, text, username, user_id, upvotes, downvotes, voters, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    comment.id.to_string(),
                    comment.post_id.to_string(),
                    comment.text,
                    comment.username,
                    comment.user_id.map(|u| u.to_string()),
                    comment.tally.upvotes,
                    comment.tally.downvotes,
                    voters,
                    format_timestamp(comment.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    pub fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        let sql = format!("{COMMENT_SELECT} WHERE post_id = ?1 ORDER BY created_at DESC");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([post_id.to_string()], comment_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(CommentRow::into_model).collect()
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                karma: row.get(4)?,
                bio: row.get(5)?,
                reset_code: row.get(6)?,
                reset_code_expiry: row.get(7)?,
                refresh_token_hash: row.get(8)?,
                created_at: row.get(9)?,
            })
        })
        .optional()?;

    row.map(UserRow::into_model).transpose()
}

pub(crate) fn query_post(conn: &Connection, id: Uuid) -> Result<Option<Post>> {
    let sql = format!("{POST_SELECT} WHERE p.id = ?1");
    let row = conn.query_row(&sql, [id.to_string()], post_row).optional()?;
    row.map(PostRow::into_model).transpose()
}

pub(crate) fn query_comment(conn: &Connection, id: Uuid) -> Result<Option<Comment>> {
    let sql = format!("{COMMENT_SELECT} WHERE id = ?1");
    let row = conn.query_row(&sql, [id.to_string()], comment_row).optional()?;
    row.map(CommentRow::into_model).transpose()
}

fn post_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        author: row.get(3)?,
        user_id: row.get(4)?,
        image_url: row.get(5)?,
        upvotes: row.get(6)?,
        downvotes: row.get(7)?,
        voters: row.get(8)?,
        comments_count: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn comment_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        text: row.get(2)?,
        username: row.get(3)?,
        user_id: row.get(4)?,
        upvotes: row.get(5)?,
        downvotes: row.get(6)?,
        voters: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
