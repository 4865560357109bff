//! Durable storage for finished recordings.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist the artifact and return its final location.
    async fn store(&self, session_id: &str, artifact: &Path) -> Result<String>;
}

/// Recordings stay where the capture wrote them.
pub struct LocalStore;

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn store(&self, _session_id: &str, artifact: &Path) -> Result<String> {
        if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
            bail!("Recording {:?} does not exist", artifact);
        }
        Ok(artifact.to_string_lossy().to_string())
    }
}

/// Uploads recordings with an HTTP PUT to `<endpoint>/<session_id>/<file>`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build storage HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn object_url(&self, session_id: &str, artifact: &Path) -> Result<String> {
        let file_name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Recording path {:?} has no file name", artifact))?;
        Ok(format!("{}/{}/{}", self.endpoint, session_id, file_name))
    }
}

#[async_trait]
impl ArtifactStore for HttpObjectStore {
    async fn store(&self, session_id: &str, artifact: &Path) -> Result<String> {
        let url = self.object_url(session_id, artifact)?;
        let bytes = tokio::fs::read(artifact)
            .await
            .with_context(|| format!("Failed to read recording {:?}", artifact))?;
        let size = bytes.len();

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to upload recording to {}", url))?;
        if !response.status().is_success() {
            bail!(
                "Recording upload to {} returned status {}",
                url,
                response.status().as_u16()
            );
        }

        info!("Uploaded recording ({} bytes) to {}", size, url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, extract::Path as UrlPath, routing::put, Router};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_local_store_returns_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("s-1_20250101_120000.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let location = LocalStore.store("s-1", &file).await.unwrap();
        assert_eq!(location, file.to_string_lossy());
    }

    #[tokio::test]
    async fn test_local_store_missing_file() {
        let result = LocalStore
            .store("s-1", Path::new("/nonexistent/s-1.wav"))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_object_url() {
        let store = HttpObjectStore::new(
            "http://storage.local/recordings/".to_string(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let url = store
            .object_url("s-1", Path::new("/data/s-1_20250101.wav"))
            .unwrap();
        assert_eq!(url, "http://storage.local/recordings/s-1/s-1_20250101.wav");
    }

    #[tokio::test]
    async fn test_http_store_uploads() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = Router::new().route(
            "/recordings/:session/:file",
            put(move |UrlPath((session, file)): UrlPath<(String, String)>, body: Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((session, file, body.len())).await;
                    axum::http::StatusCode::CREATED
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("s-9.wav");
        std::fs::write(&file, vec![0u8; 64]).unwrap();

        let store = HttpObjectStore::new(
            format!("http://{}/recordings", addr),
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let location = store.store("s-9", &file).await.unwrap();

        assert_eq!(location, format!("http://{}/recordings/s-9/s-9.wav", addr));
        let (session, name, size) = rx.recv().await.unwrap();
        assert_eq!(session, "s-9");
        assert_eq!(name, "s-9.wav");
        assert_eq!(size, 64);
    }
}
