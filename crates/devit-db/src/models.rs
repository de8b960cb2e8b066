//! Database row types, mapped directly from SQLite rows.
//! Converted into devit-types models on load so that the service layer only
//! ever sees parsed ids, parsed timestamps and initialized voter sets.
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::debug;
use uuid::Uuid;

use devit_types::models::{Comment, Post, User, VoteTally, Voters};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub karma: i64,
    pub bio: Option<String>,
    pub reset_code: Option<String>,
    pub reset_code_expiry: Option<String>,
    pub refresh_token_hash: Option<String>,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub user_id: String,
    pub image_url: Option<String>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub voters: Option<String>,
    pub comments_count: i64,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub text: String,
    pub username: String,
    pub user_id: Option<String>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub voters: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn into_model(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            username: self.username,
            email: self.email,
            password_hash: self.password,
            karma: self.karma,
            bio: self.bio,
            reset_code: self.reset_code,
            reset_code_expiry: self
                .reset_code_expiry
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            refresh_token_hash: self.refresh_token_hash,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl PostRow {
    pub fn into_model(self) -> Result<Post> {
        Ok(Post {
            id: parse_id(&self.id)?,
            title: self.title,
            content: self.content,
            author: self.author,
            user_id: parse_id(&self.user_id)?,
            image_url: self.image_url,
            tally: load_tally(
                &self.id,
                self.upvotes,
                self.downvotes,
                self.voters.as_deref(),
            )?,
            comments_count: self.comments_count,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl CommentRow {
    pub fn into_model(self) -> Result<Comment> {
        Ok(Comment {
            id: parse_id(&self.id)?,
            post_id: parse_id(&self.post_id)?,
            text: self.text,
            username: self.username,
            user_id: self.user_id.as_deref().map(parse_id).transpose()?,
            tally: load_tally(
                &self.id,
                self.upvotes,
                self.downvotes,
                self.voters.as_deref(),
            )?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Voter sets as stored. A NULL column is a row written before votes were
/// tracked and is read as two empty sets.
pub fn normalize_voters(raw: Option<&str>) -> Result<Voters> {
    match raw {
        None => Ok(Voters::default()),
        Some(json) => serde_json::from_str(json).context("corrupt voters column"),
    }
}

/// Counters are always derived from the voter sets. Stored counters that
/// disagree (legacy rows) are replaced on load and rewritten by the next vote.
fn load_tally(id: &str, upvotes: i64, downvotes: i64, raw: Option<&str>) -> Result<VoteTally> {
    let voters = normalize_voters(raw).with_context(|| format!("record {}", id))?;
    let tally = VoteTally::from_voters(voters);
    if tally.upvotes != upvotes || tally.downvotes != downvotes {
        debug!(
            %id,
            stored_up = upvotes,
            stored_down = downvotes,
            "stored vote counters disagree with voter sets"
        );
    }
    Ok(tally)
}

pub fn encode_voters(voters: &Voters) -> Result<String> {
    Ok(serde_json::to_string(voters)?)
}

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_voters_normalize_to_empty_sets() {
        assert_eq!(normalize_voters(None).unwrap(), Voters::default());
        assert!(normalize_voters(Some("not json")).is_err());
    }

    #[test]
    fn legacy_counters_follow_the_voter_sets() {
        let legacy = load_tally("p1", 5, 2, None).unwrap();
        assert_eq!((legacy.upvotes, legacy.downvotes), (0, 0));

        let uid = Uuid::new_v4();
        let raw = format!(r#"{{"upvoters":["{uid}"],"downvoters":[]}}"#);
        let tally = load_tally("p2", 9, 9, Some(&raw)).unwrap();
        assert_eq!((tally.upvotes, tally.downvotes), (1, 0));
    }

    #[test]
    fn parses_both_timestamp_shapes() {
        let now = Utc::now();
        let round = parse_timestamp(&format_timestamp(now)).unwrap();
        assert_eq!(round.timestamp_micros(), now.timestamp_micros());

        let legacy = parse_timestamp("2024-03-01 12:30:00").unwrap();
        assert_eq!(legacy.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    }
}
