//! MCP server initialization for the stdio transport.
//!
//! Wires the embedding provider, pipeline manager, and config store into the
//! [`RuneTools`] handler and serves it over line-delimited JSON-RPC on
//! stdin/stdout. All logging goes to stderr; stdout carries only protocol
//! frames.

use std::sync::Arc;

use anyhow::Result;
use rmcp::ServiceExt;

use crate::config::{ConfigStore, RuneConfig, State};
use crate::embedding;
use crate::pipeline::PipelineManager;
use crate::tools::RuneTools;

/// Start the MCP server over stdio.
pub async fn serve_stdio(config: RuneConfig) -> Result<()> {
    tracing::info!("starting Rune MCP server on stdio");

    // Persistent state is the config file plus a logs directory next to it.
    if let Err(e) = std::fs::create_dir_all(crate::config::logs_dir()) {
        tracing::warn!(%e, "could not create logs directory");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let embedder: Arc<dyn embedding::EmbeddingProvider> = Arc::from(provider);
    tracing::info!(dim = embedder.dimensions(), "embedding provider ready");

    let manager = Arc::new(PipelineManager::new(embedder));
    let config_store = Arc::new(ConfigStore::at_default_path());

    // Build pipelines up front when already activated; a dormant install
    // starts with the gate closed and builds lazily after activation.
    if config.state == State::Active {
        match manager.reload(&config).await {
            Ok(report) => {
                tracing::info!(state = ?report.state, generation = report.generation, "pipelines ready")
            }
            Err(e) => tracing::warn!(%e, "initial pipeline build failed — serving degraded"),
        }
    } else {
        tracing::info!("state is dormant — capture/recall gated until activation");
    }

    let tools = RuneTools::new(manager, config_store);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running — waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}
