//! Rune — encrypted organizational memory for AI agents.
//!
//! Rune is an MCP server that lets autonomous agents remember and recall
//! organizational decisions without ever holding plaintext at rest. All
//! persisted state is a vector embedding plus encrypted metadata on a
//! remote FHE-capable store (enVector); similarity scoring runs over
//! ciphertext, and the single secret key lives in a separate trust boundary
//! (the Vault) that this process never touches.
//!
//! # Architecture
//!
//! - **Capture** ([`scribe`]): a three-tier cascade — local embedding
//!   similarity filter, LLM policy filter, LLM structured extraction —
//!   ending in an encrypted insert.
//! - **Recall** ([`retriever`]): multi-query expansion, parallel encrypted
//!   top-k search, Vault-mediated score and metadata decryption, and
//!   certainty-respecting answer synthesis with citations.
//! - **Transport**: MCP (JSON-RPC 2.0) over stdio, exposing `capture`,
//!   `recall`, `vault_status`, and `reload_pipelines`.
//!
//! # Modules
//!
//! - [`config`] — JSON configuration, env overrides, and the dormant/active
//!   state gate
//! - [`embedding`] — local ONNX multilingual sentence embeddings
//! - [`llm`] — provider-polymorphic text generation (Anthropic/OpenAI/Gemini)
//! - [`envector`] — the encrypted vector store adapter
//! - [`vault`] — the trust-isolated decryption client
//! - [`record`] — the decision record model
//! - [`pipeline`] — atomic pipeline construction and reload

pub mod config;
pub mod embedding;
pub mod envector;
pub mod errors;
pub mod language;
pub mod llm;
pub mod pipeline;
pub mod record;
pub mod retriever;
pub mod scribe;
pub mod server;
pub mod tools;
pub mod vault;
