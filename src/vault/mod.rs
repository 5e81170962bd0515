//! Vault adapter — the trust-isolated decryption client.
//!
//! The Vault holds the single secret key; this process never touches it.
//! The adapter only hands ciphertext across the boundary and only receives
//! decrypted scores and metadata back. It deliberately exposes no operation
//! that accepts plaintext vectors or plaintext metadata.
//!
//! Policy rejections (the Vault's per-call top-k cap, revoked tokens) are
//! distinguished from transport failures: callers must not retry a
//! [`VaultError::PolicyDenied`].

pub mod proto;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint};
use tracing::warn;

use crate::envector::{MetadataCipher, ScoreCipher};
use crate::errors::VaultError;
use proto::{
    DecryptMetadataRequest, DecryptScoresRequest, StatusRequest, VaultServiceClient,
};

/// Default deadline for Vault RPCs.
const DEADLINE: Duration = Duration::from_secs(10);

/// A decrypted similarity entry: store row index plus cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorePair {
    pub row: u32,
    pub similarity: f32,
}

/// Result of a Vault health probe. Never an error — unreachable Vaults
/// report `reachable: false`.
#[derive(Debug, Clone)]
pub struct VaultStatus {
    pub reachable: bool,
    pub security_mode: String,
}

/// Seam the recall pipeline depends on; implemented by [`VaultAdapter`] and
/// by the in-memory fake in the integration tests.
#[async_trait]
pub trait ScoreVault: Send + Sync {
    /// Decrypt a score ciphertext into `(row, similarity)` pairs, capped by
    /// the server at its per-call top-k limit.
    async fn decrypt_scores(
        &self,
        cipher: &ScoreCipher,
        top_k: usize,
    ) -> Result<Vec<ScorePair>, VaultError>;

    /// Decrypt metadata ciphertexts into plaintext JSON strings.
    async fn decrypt_metadata(
        &self,
        ciphers: &[MetadataCipher],
    ) -> Result<Vec<String>, VaultError>;

    /// Probe reachability and the server-reported security mode.
    async fn status(&self) -> VaultStatus;
}

/// gRPC client for the Vault service. The channel is created lazily and
/// multiplexed; each call leases its own client clone so no lock is held
/// across await points.
pub struct VaultAdapter {
    target: String,
    token: String,
    channel: OnceCell<Channel>,
}

impl VaultAdapter {
    pub fn new(endpoint: &str, token: impl Into<String>) -> Self {
        Self {
            target: derive_grpc_target(endpoint),
            token: token.into(),
            channel: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<VaultServiceClient, VaultError> {
        let channel = self
            .channel
            .get_or_try_init(|| async {
                Endpoint::from_shared(self.target.clone())
                    .map_err(|e| VaultError::Unavailable(format!("invalid endpoint: {e}")))
                    .map(|ep| ep.connect_timeout(Duration::from_secs(5)).connect_lazy())
            })
            .await?;
        Ok(VaultServiceClient::new(channel.clone()))
    }

    fn request_with_deadline<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(DEADLINE);
        request
    }
}

/// Map a tonic status to the Vault error taxonomy. Permission and quota
/// codes are policy, everything else is transport.
fn classify_status(status: tonic::Status) -> VaultError {
    match status.code() {
        tonic::Code::PermissionDenied | tonic::Code::ResourceExhausted => {
            VaultError::PolicyDenied(status.message().to_string())
        }
        _ => VaultError::Unavailable(format!("{}: {}", status.code(), status.message())),
    }
}

/// Map the structured `error` field of a Vault response. The server reports
/// cap violations in-band as well as via status codes.
fn classify_inband_error(error: &str) -> VaultError {
    let lowered = error.to_lowercase();
    if lowered.contains("policy") || lowered.contains("top-k") || lowered.contains("top_k") {
        VaultError::PolicyDenied(error.to_string())
    } else {
        VaultError::Unavailable(error.to_string())
    }
}

/// Normalize the configured endpoint into a tonic URI.
///
/// Accepts `host:port`, `tcp://host:port`, and `http(s)://host[:port]`.
/// A bare hostname gets the default Vault gRPC port.
fn derive_grpc_target(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("tcp://") {
        return format!("http://{rest}");
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }
    if trimmed.contains(':') {
        format!("http://{trimmed}")
    } else {
        format!("http://{trimmed}:50051")
    }
}

#[async_trait]
impl ScoreVault for VaultAdapter {
    async fn decrypt_scores(
        &self,
        cipher: &ScoreCipher,
        top_k: usize,
    ) -> Result<Vec<ScorePair>, VaultError> {
        let mut client = self.client().await?;
        let request = self.request_with_deadline(DecryptScoresRequest {
            token: self.token.clone(),
            score_cipher_b64: cipher.0.clone(),
            top_k: top_k as u32,
        });

        let response = client
            .decrypt_scores(request)
            .await
            .map_err(classify_status)?
            .into_inner();

        if !response.error.is_empty() {
            return Err(classify_inband_error(&response.error));
        }

        Ok(response
            .results
            .into_iter()
            .map(|e| ScorePair {
                row: e.row,
                similarity: e.similarity,
            })
            .collect())
    }

    async fn decrypt_metadata(
        &self,
        ciphers: &[MetadataCipher],
    ) -> Result<Vec<String>, VaultError> {
        let mut client = self.client().await?;
        let request = self.request_with_deadline(DecryptMetadataRequest {
            token: self.token.clone(),
            ciphers: ciphers.iter().map(|c| c.0.clone()).collect(),
        });

        let response = client
            .decrypt_metadata(request)
            .await
            .map_err(classify_status)?
            .into_inner();

        if !response.error.is_empty() {
            return Err(classify_inband_error(&response.error));
        }

        Ok(response.plaintexts)
    }

    async fn status(&self) -> VaultStatus {
        let client = match self.client().await {
            Ok(c) => c,
            Err(e) => {
                warn!(%e, "vault status probe failed to build client");
                return VaultStatus {
                    reachable: false,
                    security_mode: "unknown".into(),
                };
            }
        };

        let mut client = client;
        let request = self.request_with_deadline(StatusRequest {
            token: self.token.clone(),
        });

        match client.get_status(request).await {
            Ok(response) => {
                let inner = response.into_inner();
                VaultStatus {
                    reachable: inner.error.is_empty(),
                    security_mode: if inner.security_mode.is_empty() {
                        "unknown".into()
                    } else {
                        inner.security_mode
                    },
                }
            }
            Err(status) => {
                warn!(code = ?status.code(), "vault unreachable");
                VaultStatus {
                    reachable: false,
                    security_mode: "unknown".into(),
                }
            }
        }
    }
}
