//! End-to-end scenarios through the router, backed by an in-memory database.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use argon2::Params;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use devit_api::clock::ManualClock;
use devit_api::credentials::CredentialStore;
use devit_api::images::{ImageStore, UploadError};
use devit_api::{AppStateInner, router};
use devit_db::Database;

struct FakeImages {
    down: AtomicBool,
}

#[async_trait]
impl ImageStore for FakeImages {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, UploadError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(UploadError::Exhausted {
                attempts: 2,
                last: "503".into(),
            });
        }
        Ok(format!("https://img.test/{}.jpg", bytes.len()))
    }
}

struct TestApp {
    app: Router,
    db: Arc<Database>,
    clock: Arc<ManualClock>,
    images: Arc<FakeImages>,
}

impl TestApp {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let images = Arc::new(FakeImages {
            down: AtomicBool::new(false),
        });
        let credentials = CredentialStore::with_params(Params::new(1024, 1, 1, None).unwrap());
        let state = AppStateInner::new(
            db.clone(),
            "integration-test-secret",
            credentials,
            images.clone(),
            clock.clone(),
        );
        Self {
            app: router(state),
            db,
            clock,
            images,
        }
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn send_form(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        fields: &[(&str, &str)],
        image: Option<&[u8]>,
    ) -> (StatusCode, Value) {
        const BOUNDARY: &str = "devit-form-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                    .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"pic.jpg\"\r\n\
                     Content-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn register(&self, username: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@devit.test"),
                    "password": "hunter22",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    async fn create_post(&self, token: &str, title: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/posts",
                Some(token),
                Some(json!({ "title": title, "content": "hello world" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }
}

fn token(body: &Value) -> String {
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let t = TestApp::new();
    let (status, body) = t.call(Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
    assert_eq!(body["status"], "online");
}

#[tokio::test]
async fn register_login_and_profile() {
    let t = TestApp::new();
    let reg = t.register("alice").await;
    assert_eq!(reg["token_type"], "bearer");
    assert_eq!(reg["username"], "alice");

    let (status, _) = t
        .call(
            Method::POST,
            "/register",
            None,
            Some(json!({ "username": "alice", "email": "other@devit.test", "password": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, login) = t
        .call(
            Method::POST,
            "/login",
            None,
            Some(json!({ "username": "alice@devit.test", "password": "hunter22" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, profile) = t
        .call(Method::GET, "/users/profile", Some(&token(&login)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["username"], "alice");
    assert_eq!(profile["karma"], 0);
    assert!(profile.get("password").is_none());
}

#[tokio::test]
async fn bad_login_does_not_reveal_which_part_was_wrong() {
    let t = TestApp::new();
    t.register("alice").await;

    let (s1, b1) = t
        .call(Method::POST, "/login", None, Some(json!({ "username": "alice", "password": "nope" })))
        .await;
    let (s2, b2) = t
        .call(Method::POST, "/login", None, Some(json!({ "username": "ghost", "password": "nope" })))
        .await;

    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1, b2);
}

#[tokio::test]
async fn protected_routes_require_a_valid_access_token() {
    let t = TestApp::new();
    let reg = t.register("alice").await;

    let (status, _) = t.call(Method::GET, "/users/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .call(Method::GET, "/users/profile", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let refresh = reg["refresh_token"].as_str().unwrap();
    let (status, _) = t.call(Method::GET, "/users/profile", Some(refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    t.clock.advance(chrono::Duration::days(8));
    let (status, _) = t
        .call(Method::GET, "/users/profile", Some(&token(&reg)), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rotates_and_logout_revokes() {
    let t = TestApp::new();
    let reg = t.register("alice").await;
    let first = reg["refresh_token"].clone();

    let (status, rotated) = t
        .call(Method::POST, "/refresh", None, Some(json!({ "refresh_token": first })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call(Method::POST, "/refresh", None, Some(json!({ "refresh_token": first })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .call(Method::POST, "/logout", Some(&token(&rotated)), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call(
            Method::POST,
            "/refresh",
            None,
            Some(json!({ "refresh_token": rotated["refresh_token"] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_reset_flow() {
    let t = TestApp::new();
    t.register("alice").await;

    let (status, ghost) = t
        .call(Method::POST, "/reset-password-request", None, Some(json!({ "email": "ghost@devit.test" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, real) = t
        .call(Method::POST, "/reset-password-request", None, Some(json!({ "email": "alice@devit.test" })))
        .await;
    assert_eq!(ghost, real);

    let code = t
        .db
        .get_user_by_email("alice@devit.test")
        .unwrap()
        .unwrap()
        .reset_code
        .unwrap();

    let (status, _) = t
        .call(
            Method::POST,
            "/reset-password",
            None,
            Some(json!({ "email": "alice@devit.test", "reset_code": code, "new_password": "fresh-pass" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call(Method::POST, "/login", None, Some(json!({ "username": "alice", "password": "fresh-pass" })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call(
            Method::POST,
            "/reset-password",
            None,
            Some(json!({ "email": "alice@devit.test", "reset_code": code, "new_password": "again" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn voting_on_a_post() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    let bob = token(&t.register("bob").await);
    let post = t.create_post(&alice, "first").await;
    let vote_uri = format!("/posts/{}/vote", post["id"].as_str().unwrap());

    let (status, body) = t
        .call(Method::POST, &vote_uri, Some(&bob), Some(json!({ "vote_type": "upvote" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upvotes"], 1);
    assert_eq!(body["action"], "added");

    let (_, body) = t
        .call(Method::POST, &vote_uri, Some(&bob), Some(json!({ "vote_type": "upvote" })))
        .await;
    assert_eq!(body["upvotes"], 1);
    assert_eq!(body["action"], "none");
    assert_eq!(body["message"], "Already upvoted");

    let (_, body) = t
        .call(Method::POST, &vote_uri, Some(&bob), Some(json!({ "vote_type": "downvote" })))
        .await;
    assert_eq!(body["upvotes"], 0);
    assert_eq!(body["downvotes"], 1);
    assert_eq!(body["action"], "switched");

    let (status, body) = t
        .call(Method::POST, &vote_uri, Some(&bob), Some(json!({ "vote_type": "sideways" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Invalid vote type: sideways");

    let (status, _) = t
        .call(Method::POST, &vote_uri, None, Some(json!({ "vote_type": "upvote" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let missing = format!("/posts/{}/vote", uuid::Uuid::new_v4());
    let (status, body) = t
        .call(Method::POST, &missing, Some(&bob), Some(json!({ "vote_type": "upvote" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Post not found");
}

#[tokio::test]
async fn comments_and_comment_votes() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    let post = t.create_post(&alice, "discuss").await;
    let post_id = post["id"].as_str().unwrap();

    let (status, _) = t
        .call(Method::POST, "/comments", None, Some(json!({ "post_id": post_id, "text": "anon" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .call(
            Method::POST,
            "/comments",
            Some(&alice),
            Some(json!({ "post_id": post_id, "text": "spoofed", "username": "bob" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, comment) = t
        .call(
            Method::POST,
            "/comments",
            Some(&alice),
            Some(json!({ "post_id": post_id, "text": "nice" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["username"], "alice");

    let (_, list) = t
        .call(Method::GET, &format!("/posts/{post_id}/comments"), None, None)
        .await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, fetched) = t.call(Method::GET, &format!("/posts/{post_id}"), None, None).await;
    assert_eq!(fetched["comments_count"], 1);

    let vote_uri = format!("/comments/{}/vote", comment["id"].as_str().unwrap());
    let (status, body) = t
        .call(Method::POST, &vote_uri, Some(&alice), Some(json!({ "vote_type": "remove_downvote" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "none");
    assert_eq!(body["message"], "Not downvoted");
    assert_eq!(body["text"], "nice");
}

#[tokio::test]
async fn upload_failure_creates_no_post() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    t.images.down.store(true, Ordering::SeqCst);

    let (status, _) = t
        .call(
            Method::POST,
            "/posts",
            Some(&alice),
            Some(json!({ "title": "pic", "content": "c", "image": B64.encode(b"jpegbytes") })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, list) = t.call(Method::GET, "/posts", None, None).await;
    assert!(list.as_array().unwrap().is_empty());

    t.images.down.store(false, Ordering::SeqCst);
    let (status, post) = t
        .call(
            Method::POST,
            "/posts",
            Some(&alice),
            Some(json!({ "title": "pic", "content": "c", "image": B64.encode(b"jpegbytes") })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["imageUrl"], "https://img.test/9.jpg");
}

#[tokio::test]
async fn form_upload_takes_images_past_the_json_body_limit() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    let image = vec![0xffu8; 3_000_000];

    // The same bytes as base64 JSON exceed axum's default 2 MB body cap.
    let (status, _) = t
        .call(
            Method::POST,
            "/posts",
            Some(&alice),
            Some(json!({ "title": "big", "content": "c", "image": B64.encode(&image) })),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, post) = t
        .send_form(
            Method::POST,
            "/posts/with-image",
            &alice,
            &[("title", "big"), ("content", "c")],
            Some(&image),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["imageUrl"], "https://img.test/3000000.jpg");
    assert_eq!(post["author"], "alice");
}

#[tokio::test]
async fn form_upload_failure_creates_no_post() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    t.images.down.store(true, Ordering::SeqCst);

    let (status, _) = t
        .send_form(
            Method::POST,
            "/posts/with-image",
            &alice,
            &[("title", "pic"), ("content", "c")],
            Some(b"jpegbytes"),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, list) = t.call(Method::GET, "/posts", None, None).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = t
        .send_form(Method::POST, "/posts/with-image", &alice, &[("content", "c")], None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn form_update_replaces_or_removes_the_image() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    let bob = token(&t.register("bob").await);
    let post = t.create_post(&alice, "mine").await;
    let uri = format!("/posts/{}/form", post["id"].as_str().unwrap());

    let (status, _) = t
        .send_form(Method::PUT, &uri, &bob, &[("title", "stolen")], Some(b"bobs"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .send_form(Method::PUT, &uri, &alice, &[("title", "with pic")], Some(b"abcde"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "with pic");
    assert_eq!(body["content"], "hello world");
    assert_eq!(body["imageUrl"], "https://img.test/5.jpg");

    let (status, body) = t
        .send_form(Method::PUT, &uri, &alice, &[("remove_image", "true")], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["imageUrl"].is_null());
    assert_eq!(body["title"], "with pic");
}

#[tokio::test]
async fn only_the_author_edits_or_deletes() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    let bob = token(&t.register("bob").await);
    let post = t.create_post(&alice, "mine").await;
    let uri = format!("/posts/{}", post["id"].as_str().unwrap());

    let (status, _) = t
        .call(Method::PUT, &uri, Some(&bob), Some(json!({ "title": "stolen" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.call(Method::DELETE, &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .call(Method::PUT, &uri, Some(&alice), Some(json!({ "title": "still mine" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "still mine");

    let (status, _) = t.call(Method::DELETE, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = t.call(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_and_search() {
    let t = TestApp::new();
    let alice = token(&t.register("alice").await);
    for title in ["Rust tips", "Cooking", "rusty bikes"] {
        t.create_post(&alice, title).await;
        t.clock.advance(chrono::Duration::seconds(1));
    }

    let (_, newest) = t.call(Method::GET, "/posts?limit=2", None, None).await;
    let titles: Vec<_> = newest.as_array().unwrap().iter().map(|p| p["title"].clone()).collect();
    assert_eq!(titles, vec![json!("rusty bikes"), json!("Cooking")]);

    let (_, found) = t.call(Method::GET, "/search?query=rust", None, None).await;
    assert_eq!(found.as_array().unwrap().len(), 2);

    let (status, _) = t.call(Method::GET, "/search?query=ru", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
