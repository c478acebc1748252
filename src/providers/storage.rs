//! Blob storage adapter: `put -> URL`. Used for TTS artifacts under the
//! stable key format `voice-{uuid}.wav`, served back at `/storage/{key}`.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ProviderError, Storage};

/// In-memory object store. Demo mode and tests share this rather than the
/// filesystem so repeated runs never leak artifacts across test cases.
#[derive(Default)]
pub struct MockStorage {
    objects: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl Storage for MockStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, ProviderError> {
        self.objects.insert(key.to_owned(), bytes);
        Ok(format!("/storage/{key}"))
    }
}

impl MockStorage {
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|v| v.clone())
    }
}

/// Live adapter backed by an S3-compatible bucket reachable over plain
/// HTTPS PUT (pre-signed-URL issuance is an external concern; this client
/// assumes a base URL that already authorizes PUT, as object-storage
/// sidecars in the pack (MinIO, R2) commonly provide in a trusted network).
pub struct LiveStorage {
    client: reqwest::Client,
    base_url: String,
}

impl LiveStorage {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Storage for LiveStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ProviderError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let resp = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ProviderError::new("storage", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("storage", format!("HTTP {}", resp.status())));
        }
        Ok(format!("/storage/{key}"))
    }
}
