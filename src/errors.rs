//! Client-visible error taxonomy.
//!
//! Every tool response carries `ok: bool`; failures additionally carry an
//! `error` tag from the closed set below plus a human-readable `detail`.
//! Consumers branch on the tag, never on transport errors.

use thiserror::Error;

/// Errors surfaced to the MCP client as string tags in tool responses.
#[derive(Debug, Error)]
pub enum RuneError {
    /// State gate closed — the plugin is not activated.
    #[error("plugin is dormant — run activation and reload_pipelines")]
    Dormant,

    /// Input failed preconditions (empty or whitespace-only text).
    #[error("input text is empty")]
    Empty,

    /// A tool argument was out of range or malformed.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// enVector RPC failed or exhausted its retries.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Vault RPC failed at the transport level.
    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    /// Vault rejected the call on policy grounds (e.g. top-k cap).
    #[error("vault policy denied: {0}")]
    PolicyDenied(String),

    /// No LLM provider configured or reachable where one is required.
    #[error("no LLM provider available")]
    LlmUnavailable,

    /// The per-tool-call budget was exceeded.
    #[error("tool call exceeded its time budget")]
    Timeout,

    /// Unclassified failure; the detail is an opaque id correlating with a
    /// stderr log line.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuneError {
    /// The wire tag placed in the `error` field of a tool response.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dormant => "dormant",
            Self::Empty => "empty",
            Self::BadArgument(_) => "bad_argument",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::VaultUnavailable(_) => "vault_unavailable",
            Self::PolicyDenied(_) => "policy_denied",
            Self::LlmUnavailable => "llm_unavailable",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

/// Failures from the enVector store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("enVector request failed: {0}")]
    Transport(String),

    #[error("enVector rejected the request ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("enVector rate limit not cleared after {0} attempts")]
    RetriesExhausted(u32),

    #[error("unexpected enVector response: {0}")]
    Decode(String),
}

/// Failures from the Vault adapter.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault transport failure: {0}")]
    Unavailable(String),

    #[error("vault policy denied: {0}")]
    PolicyDenied(String),

    #[error("vault returned an undecodable response: {0}")]
    Decode(String),
}

/// Failures from the LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM client is not available")]
    NotAvailable,

    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM provider rate limited the request")]
    RateLimited,

    #[error("LLM response missing expected content")]
    MalformedResponse,
}

impl From<StoreError> for RuneError {
    fn from(err: StoreError) -> Self {
        RuneError::StoreUnavailable(err.to_string())
    }
}

impl From<VaultError> for RuneError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::PolicyDenied(msg) => RuneError::PolicyDenied(msg),
            other => RuneError::VaultUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_wire_tags() {
        assert_eq!(RuneError::Dormant.kind(), "dormant");
        assert_eq!(RuneError::Empty.kind(), "empty");
        assert_eq!(RuneError::BadArgument("x".into()).kind(), "bad_argument");
        assert_eq!(
            RuneError::StoreUnavailable("x".into()).kind(),
            "store_unavailable"
        );
        assert_eq!(
            RuneError::VaultUnavailable("x".into()).kind(),
            "vault_unavailable"
        );
        assert_eq!(RuneError::PolicyDenied("x".into()).kind(), "policy_denied");
        assert_eq!(RuneError::LlmUnavailable.kind(), "llm_unavailable");
        assert_eq!(RuneError::Timeout.kind(), "timeout");
        assert_eq!(RuneError::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn vault_policy_denial_keeps_its_kind() {
        let err: RuneError = VaultError::PolicyDenied("top-k cap".into()).into();
        assert_eq!(err.kind(), "policy_denied");

        let err: RuneError = VaultError::Unavailable("connect refused".into()).into();
        assert_eq!(err.kind(), "vault_unavailable");
    }
}
