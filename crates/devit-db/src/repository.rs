//! Store seams consumed by the service layer.
//!
//! The services in devit-api are written against these traits rather than
//! against [`Database`] directly, so the vote and credential state machines
//! only see typed operations, each of which is atomic on its own.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;
use uuid::Uuid;

use devit_types::models::{Reactable, ReactableKind, User, VoteTally};

use crate::Database;
use crate::models::encode_voters;
use crate::queries::{query_comment, query_post};

pub trait UserRepository: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    fn insert_user(&self, user: &User) -> Result<()>;

    /// Overwrite (or clear with `None`) the stored refresh-token digest.
    fn set_refresh_token_hash(&self, id: Uuid, hash: Option<&str>) -> Result<()>;
    /// Compare-and-swap on the refresh-token digest. `false` if it changed underneath.
    fn swap_refresh_token_hash(&self, id: Uuid, expected: &str, new: &str) -> Result<bool>;
    /// Compare-and-swap on the password hash. `false` if it changed underneath.
    fn swap_password_hash(&self, id: Uuid, expected: &str, new: &str) -> Result<bool>;
    fn set_reset_code(&self, id: Uuid, code: &str, expiry: DateTime<Utc>) -> Result<()>;
    /// Replace the password hash and clear the reset fields iff `code` is still pending.
    fn consume_reset_code(&self, id: Uuid, code: &str, password_hash: &str) -> Result<bool>;
}

pub trait ReactableRepository: Send + Sync {
    fn find_reactable(&self, kind: ReactableKind, id: Uuid) -> Result<Option<Reactable>>;

    /// Load the tally of `id`, hand it to `mutation`, and persist the tally it
    /// returns, all as one atomic unit. `mutation` returning `None` leaves the
    /// record untouched. Returns the record as it stands afterwards, or `None`
    /// if no such record exists.
    fn atomic_vote_update(
        &self,
        kind: ReactableKind,
        id: Uuid,
        mutation: &mut dyn FnMut(&VoteTally) -> Option<VoteTally>,
    ) -> Result<Option<Reactable>>;

    /// Delete a reactable. Deleting a post also deletes its comments.
    fn delete_reactable(&self, kind: ReactableKind, id: Uuid) -> Result<bool>;

    fn delete_comments_by_post(&self, post_id: Uuid) -> Result<usize>;
}

impl UserRepository for Database {
    fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_user_by_username(username)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.get_user_by_email(email)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.get_user_by_id(id)
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        self.create_user(user)
    }

    fn set_refresh_token_hash(&self, id: Uuid, hash: Option<&str>) -> Result<()> {
        self.update_refresh_token_hash(id, hash)
    }

    fn swap_refresh_token_hash(&self, id: Uuid, expected: &str, new: &str) -> Result<bool> {
        self.compare_and_swap_refresh_token_hash(id, expected, new)
    }

    fn swap_password_hash(&self, id: Uuid, expected: &str, new: &str) -> Result<bool> {
        self.compare_and_swap_password(id, expected, new)
    }

    fn set_reset_code(&self, id: Uuid, code: &str, expiry: DateTime<Utc>) -> Result<()> {
        self.store_reset_code(id, code, expiry)
    }

    fn consume_reset_code(&self, id: Uuid, code: &str, password_hash: &str) -> Result<bool> {
        self.redeem_reset_code(id, code, password_hash)
    }
}

impl ReactableRepository for Database {
    fn find_reactable(&self, kind: ReactableKind, id: Uuid) -> Result<Option<Reactable>> {
        self.with_conn(|conn| load_reactable(conn, kind, id))
    }

    fn atomic_vote_update(
        &self,
        kind: ReactableKind,
        id: Uuid,
        mutation: &mut dyn FnMut(&VoteTally) -> Option<VoteTally>,
    ) -> Result<Option<Reactable>> {
        self.with_tx(|tx| {
            let Some(current) = load_reactable(tx, kind, id)? else {
                return Ok(None);
            };

            let Some(next) = mutation(current.tally()) else {
                return Ok(Some(current));
            };

            let sql = format!(
                "UPDATE {} SET upvotes = ?2, downvotes = ?3, voters = ?4 WHERE id = ?1",
                kind.table()
            );
            tx.execute(
                &sql,
                params![id.to_string(), next.upvotes, next.downvotes, encode_voters(&next.voters)?],
            )?;
            debug!(%id, table = kind.table(), upvotes = next.upvotes, downvotes = next.downvotes, "vote committed");

            load_reactable(tx, kind, id)
        })
    }

    fn delete_reactable(&self, kind: ReactableKind, id: Uuid) -> Result<bool> {
        self.with_tx(|tx| {
            if kind == ReactableKind::Post {
                tx.execute("DELETE FROM comments WHERE post_id = ?1", [id.to_string()])?;
            }
            let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
            Ok(tx.execute(&sql, [id.to_string()])? == 1)
        })
    }

    fn delete_comments_by_post(&self, post_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM comments WHERE post_id = ?1", [post_id.to_string()])?)
        })
    }
}

fn load_reactable(
    conn: &rusqlite::Connection,
    kind: ReactableKind,
    id: Uuid,
) -> Result<Option<Reactable>> {
    Ok(match kind {
        ReactableKind::Post => query_post(conn, id)?.map(Reactable::Post),
        ReactableKind::Comment => query_comment(conn, id)?.map(Reactable::Comment),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devit_types::models::{Comment, Post, Voters};

    fn seed_post(db: &Database) -> Post {
        let post = Post {
            id: Uuid::new_v4(),
            title: "hello".into(),
            content: "world".into(),
            author: "alice".into(),
            user_id: Uuid::new_v4(),
            image_url: None,
            tally: VoteTally::default(),
            comments_count: 0,
            created_at: Utc::now(),
        };
        db.insert_post(&post).unwrap();
        post
    }

    fn seed_comment(db: &Database, post_id: Uuid) -> Comment {
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id,
            text: "nice".into(),
            username: "bob".into(),
            user_id: None,
            tally: VoteTally::default(),
            created_at: Utc::now(),
        };
        db.insert_comment(&comment).unwrap();
        comment
    }

    #[test]
    fn vote_update_persists_sets_and_counters_together() {
        let db = Database::open_in_memory().unwrap();
        let post = seed_post(&db);
        let voter = Uuid::new_v4();

        let updated = db
            .atomic_vote_update(ReactableKind::Post, post.id, &mut |tally| {
                let mut voters = tally.voters.clone();
                voters.upvoters.insert(voter);
                Some(VoteTally::from_voters(voters))
            })
            .unwrap()
            .unwrap();

        assert_eq!(updated.tally().upvotes, 1);
        let reloaded = db.find_reactable(ReactableKind::Post, post.id).unwrap().unwrap();
        assert!(reloaded.tally().voters.upvoters.contains(&voter));
    }

    #[test]
    fn vote_update_on_missing_record_is_none() {
        let db = Database::open_in_memory().unwrap();
        let mut called = false;
        let out = db
            .atomic_vote_update(ReactableKind::Comment, Uuid::new_v4(), &mut |_| {
                called = true;
                None
            })
            .unwrap();
        assert!(out.is_none());
        assert!(!called);
    }

    #[test]
    fn legacy_rows_load_with_empty_voter_sets() {
        let db = Database::open_in_memory().unwrap();
        let post = seed_post(&db);
        db.with_conn(|conn| {
            conn.execute("UPDATE posts SET voters = NULL WHERE id = ?1", [post.id.to_string()])?;
            Ok(())
        })
        .unwrap();

        let loaded = db.find_reactable(ReactableKind::Post, post.id).unwrap().unwrap();
        assert_eq!(loaded.tally().voters, Voters::default());
    }

    #[test]
    fn deleting_a_post_cascades_to_comments() {
        let db = Database::open_in_memory().unwrap();
        let post = seed_post(&db);
        let comment = seed_comment(&db, post.id);

        assert!(db.delete_reactable(ReactableKind::Post, post.id).unwrap());
        assert!(db.get_post(post.id).unwrap().is_none());
        assert!(db.get_comment(comment.id).unwrap().is_none());
        assert!(!db.delete_reactable(ReactableKind::Post, post.id).unwrap());
    }

    #[test]
    fn delete_comments_by_post_counts_rows() {
        let db = Database::open_in_memory().unwrap();
        let post = seed_post(&db);
        seed_comment(&db, post.id);
        seed_comment(&db, post.id);

        assert_eq!(db.delete_comments_by_post(post.id).unwrap(), 2);
        assert!(db.list_comments(post.id).unwrap().is_empty());
    }
}
