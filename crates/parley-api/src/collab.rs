use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// External binary object storage. The core never persists raw bytes;
/// it stores whatever URL this collaborator returns.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        path_hint: &str,
    ) -> anyhow::Result<String>;

    async fn delete(&self, url: &str) -> anyhow::Result<()>;
}

/// External notification emitter. Fire-and-forget: callers dispatch
/// after their transaction commits and only log failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

// -- HTTP-backed implementations --

#[derive(Deserialize)]
struct StoreBlobResponse {
    url: String,
}

pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn store(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        path_hint: &str,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/blobs", self.base_url))
            .query(&[("hint", path_hint)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        let body: StoreBlobResponse = response.json().await?;
        Ok(body.url)
    }

    async fn delete(&self, url: &str) -> anyhow::Result<()> {
        self.client
            .delete(format!("{}/blobs", self.base_url))
            .query(&[("url", url)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/notifications", self.base_url))
            .json(&serde_json::json!({
                "user_id": user_id,
                "kind": kind,
                "payload": payload,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// -- Local stand-ins for development and tests --

/// Accepts every blob and returns a synthetic URL; deletes are no-ops.
pub struct NullBlobStore;

#[async_trait]
impl BlobStore for NullBlobStore {
    async fn store(
        &self,
        bytes: Vec<u8>,
        _content_type: &str,
        path_hint: &str,
    ) -> anyhow::Result<String> {
        Ok(format!("null://{}/{}", path_hint, bytes.len()))
    }

    async fn delete(&self, _url: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs notifications instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        info!("notify {} kind={} payload={}", user_id, kind, payload);
        Ok(())
    }
}
