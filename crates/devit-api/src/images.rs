use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no image host credentials configured")]
    NotConfigured,

    #[error("all {attempts} image host credentials failed, last error: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// Where post images are pushed. Returns the public URL of the stored image.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, UploadError>;
}

/// ImgBB client. API keys are tried in the configured order; the first one
/// that yields a URL wins.
pub struct ImgbbStore {
    client: reqwest::Client,
    endpoint: String,
    api_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImgbbResponse {
    #[serde(default)]
    success: bool,
    data: Option<ImgbbImage>,
}

#[derive(Debug, Deserialize)]
struct ImgbbImage {
    url: String,
}

impl ImgbbStore {
    pub fn new(endpoint: String, api_keys: Vec<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            api_keys,
        })
    }

    async fn try_upload(&self, api_key: &str, encoded: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&[("key", api_key), ("image", encoded)])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        let parsed: ImgbbResponse =
            serde_json::from_slice(&body).with_context(|| format!("unreadable response ({status})"))?;

        if !status.is_success() || !parsed.success {
            bail!("image host answered {}", status);
        }
        parsed
            .data
            .map(|d| d.url)
            .ok_or_else(|| anyhow!("image host response has no url"))
    }
}

#[async_trait]
impl ImageStore for ImgbbStore {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, UploadError> {
        if self.api_keys.is_empty() {
            return Err(UploadError::NotConfigured);
        }

        let encoded = B64.encode(&bytes);
        let mut last = String::new();

        for (idx, key) in self.api_keys.iter().enumerate() {
            match self.try_upload(key, &encoded).await {
                Ok(url) => {
                    info!(key_index = idx, size = bytes.len(), "image uploaded");
                    return Ok(url);
                }
                Err(e) => {
                    warn!(key_index = idx, "image upload attempt failed: {:#}", e);
                    last = format!("{:#}", e);
                }
            }
        }

        Err(UploadError::Exhausted {
            attempts: self.api_keys.len(),
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Form, Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    /// Local stand-in for the image host: accepts only the key "good-key".
    async fn spawn_stub() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));

        async fn handler(
            State(hits): State<Arc<AtomicUsize>>,
            Form(form): Form<HashMap<String, String>>,
        ) -> (StatusCode, Json<Value>) {
            hits.fetch_add(1, Ordering::SeqCst);
            let has_image = form.get("image").is_some_and(|i| !i.is_empty());
            if form.get("key").map(String::as_str) == Some("good-key") && has_image {
                (
                    StatusCode::OK,
                    Json(json!({ "success": true, "data": { "url": "https://i.example/abc.png" } })),
                )
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "success": false, "error": { "message": "Invalid API v1 key." } })),
                )
            }
        }

        let app = Router::new().route("/upload", post(handler)).with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/upload", addr), hits)
    }

    #[tokio::test]
    async fn falls_back_to_next_key() {
        let (endpoint, hits) = spawn_stub().await;
        let store = ImgbbStore::new(
            endpoint,
            vec!["revoked-key".into(), "good-key".into(), "never-tried".into()],
            Duration::from_secs(5),
        )
        .unwrap();

        let url = store.upload(b"\x89PNG fake".to_vec()).await.unwrap();
        assert_eq!(url, "https://i.example/abc.png");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_keys_failing_is_an_upload_error() {
        let (endpoint, hits) = spawn_stub().await;
        let store =
            ImgbbStore::new(endpoint, vec!["a".into(), "b".into()], Duration::from_secs(5)).unwrap();

        let err = store.upload(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, UploadError::Exhausted { attempts: 2, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_keys_means_not_configured() {
        let store = ImgbbStore::new("http://127.0.0.1:9/upload".into(), vec![], Duration::from_secs(1))
            .unwrap();
        assert!(matches!(
            store.upload(vec![1]).await,
            Err(UploadError::NotConfigured)
        ));
    }
}
