use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Users --

/// A stored account. Carries credential material, so it is never serialized
/// and its `Debug` output redacts the secret fields.
#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub karma: i64,
    pub bio: Option<String>,
    pub reset_code: Option<String>,
    pub reset_code_expiry: Option<DateTime<Utc>>,
    pub refresh_token_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("karma", &self.karma)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// -- Votes --

/// Which table a reactable lives in. Posts and comments share the vote shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactableKind {
    Post,
    Comment,
}

impl ReactableKind {
    pub fn table(self) -> &'static str {
        match self {
            ReactableKind::Post => "posts",
            ReactableKind::Comment => "comments",
        }
    }

    pub fn noun(self) -> &'static str {
        match self {
            ReactableKind::Post => "Post",
            ReactableKind::Comment => "Comment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteType {
    Upvote,
    Downvote,
    RemoveUpvote,
    RemoveDownvote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVoteType(pub String);

impl fmt::Display for UnknownVoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid vote type: {}", self.0)
    }
}

impl std::error::Error for UnknownVoteType {}

impl FromStr for VoteType {
    type Err = UnknownVoteType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upvote" => Ok(VoteType::Upvote),
            "downvote" => Ok(VoteType::Downvote),
            "remove_upvote" => Ok(VoteType::RemoveUpvote),
            "remove_downvote" => Ok(VoteType::RemoveDownvote),
            other => Err(UnknownVoteType(other.to_string())),
        }
    }
}

/// What a vote call did to the voter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteAction {
    None,
    Added,
    Removed,
    Switched,
}

/// The two disjoint voter sets of a reactable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voters {
    #[serde(default)]
    pub upvoters: BTreeSet<Uuid>,
    #[serde(default)]
    pub downvoters: BTreeSet<Uuid>,
}

/// Vote counters plus the membership they are derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
    pub voters: Voters,
}

impl VoteTally {
    /// Tally whose counters are recomputed from the voter sets.
    pub fn from_voters(voters: Voters) -> Self {
        Self {
            upvotes: voters.upvoters.len() as i64,
            downvotes: voters.downvoters.len() as i64,
            voters,
        }
    }
}

// -- Content --

#[derive(Debug, Clone)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author: String,
    pub user_id: Uuid,
    pub image_url: Option<String>,
    pub tally: VoteTally,
    pub comments_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub text: String,
    pub username: String,
    pub user_id: Option<Uuid>,
    pub tally: VoteTally,
    pub created_at: DateTime<Utc>,
}

/// A post or a comment as loaded for a vote transition.
#[derive(Debug, Clone)]
pub enum Reactable {
    Post(Post),
    Comment(Comment),
}

impl Reactable {
    pub fn tally(&self) -> &VoteTally {
        match self {
            Reactable::Post(p) => &p.tally,
            Reactable::Comment(c) => &c.tally,
        }
    }
}

/// Listing order for posts. Unknown values fall back to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostSort {
    #[default]
    Newest,
    Oldest,
    MostUpvoted,
    MostDownvoted,
}

impl PostSort {
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("oldest") => PostSort::Oldest,
            Some("most_upvoted") => PostSort::MostUpvoted,
            Some("most_downvoted") => PostSort::MostDownvoted,
            _ => PostSort::Newest,
        }
    }
}
