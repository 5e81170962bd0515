//! enVector Cloud adapter — the only module that speaks the store protocol.
//!
//! Owns the tenant-scoped session. Everything that leaves this process via
//! the adapter is ciphertext: vector inputs are encrypted with the tenant
//! encryption key by the store's `encrypt` endpoint before insert/search
//! dispatch, and metadata is encrypted the same way. The encryption key is
//! public-ish — it cannot decrypt anything; the secret key lives in Vault.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::errors::StoreError;

/// Opaque base64 score ciphertext returned by an encrypted search. Only the
/// Vault can turn this back into `(row, similarity)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCipher(pub String);

/// Opaque base64 metadata ciphertext for a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCipher(pub String);

/// Seam the pipelines depend on; implemented by [`EnVectorAdapter`] and by
/// the in-memory fake in the integration tests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotently create the index if it does not exist.
    async fn ensure_index(&self, index: &str, dim: usize) -> Result<(), StoreError>;

    /// Encrypt and insert one vector with its serialized record metadata.
    async fn insert(&self, index: &str, vector: &[f32], record_json: &str)
        -> Result<(), StoreError>;

    /// Encrypted similarity scoring; returns the score ciphertext blob.
    async fn search(&self, index: &str, vector: &[f32], topk: usize)
        -> Result<ScoreCipher, StoreError>;

    /// Fetch metadata ciphertext for the given result rows.
    async fn fetch_metadata(
        &self,
        index: &str,
        rows: &[u32],
    ) -> Result<Vec<MetadataCipher>, StoreError>;
}

/// Retry schedule for rate-limit responses, per attempt.
const BACKOFF: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Per-request deadline for store calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for enVector Cloud.
pub struct EnVectorAdapter {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    index_ready: OnceCell<()>,
}

impl EnVectorAdapter {
    pub fn new(endpoint: &str, api_key: impl Into<String>) -> Self {
        Self {
            base_url: normalize_endpoint(endpoint),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            index_ready: OnceCell::new(),
        }
    }

    /// POST a JSON body, retrying rate-limit and overload responses with
    /// exponential backoff before giving up.
    async fn post(&self, path: &str, body: Value) -> Result<Value, StoreError> {
        let url = format!("{}{path}", self.base_url);

        let mut attempt = 0u32;
        loop {
            let result = self
                .http
                .post(&url)
                .timeout(REQUEST_TIMEOUT)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => return Err(StoreError::Transport(e.to_string())),
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            {
                if attempt as usize >= BACKOFF.len() {
                    return Err(StoreError::RetriesExhausted(attempt));
                }
                let delay = BACKOFF[attempt as usize];
                warn!(%url, attempt, ?delay, "enVector throttled request, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            return response
                .json()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()));
        }
    }

    /// Encrypt a payload with the tenant key on the store side. `kind` is
    /// `"vector"` or `"metadata"`.
    async fn encrypt(&self, index: &str, kind: &str, payload: Value) -> Result<String, StoreError> {
        let data = self
            .post(
                "/v1/encrypt",
                json!({"index": index, "kind": kind, "payload": payload}),
            )
            .await?;
        data["cipher"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Decode("encrypt response missing cipher".into()))
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        // bare host:port — assume plaintext HTTP (local dev deployments)
        format!("http://{trimmed}")
    }
}

#[async_trait]
impl VectorStore for EnVectorAdapter {
    async fn ensure_index(&self, index: &str, dim: usize) -> Result<(), StoreError> {
        self.index_ready
            .get_or_try_init(|| async {
                let result = self
                    .post("/v1/index/ensure", json!({"index": index, "dim": dim}))
                    .await;
                match result {
                    Ok(_) => {
                        debug!(index, dim, "enVector index ready");
                        Ok(())
                    }
                    // 409: index already exists with this shape
                    Err(StoreError::Api { status: 409, .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await
            .map(|_| ())
    }

    async fn insert(
        &self,
        index: &str,
        vector: &[f32],
        record_json: &str,
    ) -> Result<(), StoreError> {
        let vector_cipher = self.encrypt(index, "vector", json!(vector)).await?;
        let metadata_cipher = self.encrypt(index, "metadata", json!(record_json)).await?;
        self.post(
            "/v1/insert",
            json!({
                "index": index,
                "vector_cipher": vector_cipher,
                "metadata_cipher": metadata_cipher,
            }),
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        vector: &[f32],
        topk: usize,
    ) -> Result<ScoreCipher, StoreError> {
        let query_cipher = self.encrypt(index, "vector", json!(vector)).await?;
        let data = self
            .post(
                "/v1/search",
                json!({"index": index, "query_cipher": query_cipher, "topk": topk}),
            )
            .await?;
        data["score_cipher"]
            .as_str()
            .map(|s| ScoreCipher(s.to_string()))
            .ok_or_else(|| StoreError::Decode("search response missing score_cipher".into()))
    }

    async fn fetch_metadata(
        &self,
        index: &str,
        rows: &[u32],
    ) -> Result<Vec<MetadataCipher>, StoreError> {
        let data = self
            .post(
                "/v1/metadata/fetch",
                json!({"index": index, "rows": rows}),
            )
            .await?;
        let ciphers = data["ciphers"]
            .as_array()
            .ok_or_else(|| StoreError::Decode("metadata response missing ciphers".into()))?;
        ciphers
            .iter()
            .map(|c| {
                c.as_str()
                    .map(|s| MetadataCipher(s.to_string()))
                    .ok_or_else(|| StoreError::Decode("non-string metadata cipher".into()))
            })
            .collect()
    }
}
