//! Pure mappings from stored models to response bodies.

use devit_types::api::{
    CommentResponse, PostResponse, ReactableResponse, UserProfile, VoteResponse,
};
use devit_types::models::{Comment, Post, Reactable, User};

use crate::votes::VoteOutcome;

pub fn post_response(post: &Post) -> PostResponse {
    PostResponse {
        id: post.id,
        title: post.title.clone(),
        content: post.content.clone(),
        author: post.author.clone(),
        user_id: post.user_id,
        upvotes: post.tally.upvotes,
        downvotes: post.tally.downvotes,
        image_url: post.image_url.clone(),
        comments_count: post.comments_count,
        voters: post.tally.voters.clone(),
        created_at: post.created_at,
    }
}

pub fn comment_response(comment: &Comment) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        post_id: comment.post_id,
        text: comment.text.clone(),
        username: comment.username.clone(),
        user_id: comment.user_id,
        upvotes: comment.tally.upvotes,
        downvotes: comment.tally.downvotes,
        voters: comment.tally.voters.clone(),
        created_at: comment.created_at,
    }
}

pub fn user_profile(user: &User) -> UserProfile {
    UserProfile {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        karma: user.karma,
        created_at: user.created_at,
        bio: user.bio.clone(),
    }
}

pub fn vote_response(outcome: &VoteOutcome) -> VoteResponse<ReactableResponse> {
    let item = match &outcome.reactable {
        Reactable::Post(p) => ReactableResponse::Post(post_response(p)),
        Reactable::Comment(c) => ReactableResponse::Comment(comment_response(c)),
    };

    VoteResponse {
        item,
        action: outcome.action,
        message: outcome.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use devit_types::models::{VoteAction, VoteTally, Voters};
    use uuid::Uuid;

    #[test]
    fn vote_response_flattens_the_item() {
        let voter = Uuid::new_v4();
        let mut voters = Voters::default();
        voters.upvoters.insert(voter);

        let post = Post {
            id: Uuid::new_v4(),
            title: "t".into(),
            content: "c".into(),
            author: "alice".into(),
            user_id: Uuid::new_v4(),
            image_url: None,
            tally: VoteTally::from_voters(voters),
            comments_count: 3,
            created_at: Utc::now(),
        };
        let outcome = VoteOutcome {
            reactable: Reactable::Post(post.clone()),
            action: VoteAction::None,
            message: Some("Already upvoted"),
        };

        let json = serde_json::to_value(vote_response(&outcome)).unwrap();
        assert_eq!(json["id"], post.id.to_string());
        assert_eq!(json["upvotes"], 1);
        assert_eq!(json["comments_count"], 3);
        assert_eq!(json["voters"]["upvoters"][0], voter.to_string());
        assert_eq!(json["action"], "none");
        assert_eq!(json["message"], "Already upvoted");
        assert!(json.get("imageUrl").is_some());
    }
}
