//! Wire types and client stub for the `rune.vault.Vault` gRPC service.
//!
//! Message structs carry prost derives and the stub follows the shape tonic
//! codegen produces, kept by hand because the service is three unary calls.

use tonic::codegen::http::uri::PathAndQuery;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptScoresRequest {
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
    /// Base64 score ciphertext from an encrypted similarity search.
    #[prost(string, tag = "2")]
    pub score_cipher_b64: ::prost::alloc::string::String,
    /// Requested result count; the server enforces its own hard cap.
    #[prost(uint32, tag = "3")]
    pub top_k: u32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ScoreEntry {
    #[prost(uint32, tag = "1")]
    pub row: u32,
    #[prost(float, tag = "2")]
    pub similarity: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptScoresResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: ::prost::alloc::vec::Vec<ScoreEntry>,
    /// Non-empty on policy rejection (e.g. top-k cap exceeded).
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptMetadataRequest {
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub ciphers: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptMetadataResponse {
    #[prost(string, repeated, tag = "1")]
    pub plaintexts: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusRequest {
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusResponse {
    /// e.g. "production", "development".
    #[prost(string, tag = "1")]
    pub security_mode: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

/// Unary client over a concrete transport channel.
#[derive(Clone)]
pub struct VaultServiceClient {
    inner: tonic::client::Grpc<tonic::transport::Channel>,
}

impl VaultServiceClient {
    pub fn new(channel: tonic::transport::Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn decrypt_scores(
        &mut self,
        request: tonic::Request<DecryptScoresRequest>,
    ) -> Result<tonic::Response<DecryptScoresResponse>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("vault channel not ready: {e}"))
        })?;
        let codec: tonic::codec::ProstCodec<DecryptScoresRequest, DecryptScoresResponse> =
            tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/rune.vault.Vault/DecryptScores");
        self.inner.unary(request, path, codec).await
    }

    pub async fn decrypt_metadata(
        &mut self,
        request: tonic::Request<DecryptMetadataRequest>,
    ) -> Result<tonic::Response<DecryptMetadataResponse>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("vault channel not ready: {e}"))
        })?;
        let codec: tonic::codec::ProstCodec<DecryptMetadataRequest, DecryptMetadataResponse> =
            tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/rune.vault.Vault/DecryptMetadata");
        self.inner.unary(request, path, codec).await
    }

    pub async fn get_status(
        &mut self,
        request: tonic::Request<StatusRequest>,
    ) -> Result<tonic::Response<StatusResponse>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::unknown(format!("vault channel not ready: {e}"))
        })?;
        let codec: tonic::codec::ProstCodec<StatusRequest, StatusResponse> =
            tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/rune.vault.Vault/GetStatus");
        self.inner.unary(request, path, codec).await
    }
}
