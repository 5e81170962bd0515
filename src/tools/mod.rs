//! The MCP tool surface.
//!
//! Four tools over stdio JSON-RPC: `capture`, `recall`, `vault_status`,
//! `reload_pipelines`. Every tool resolves to a JSON envelope with
//! `ok: bool` — logical failures are data, not protocol errors. The state
//! gate rejects capture/recall before any adapter or LLM is touched, and
//! each call runs under a 60-second budget.

pub mod capture;
pub mod recall;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capture::CaptureParams;
use recall::RecallParams;
use rmcp::handler::server::tool::{Parameters, ToolRouter};
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde_json::json;
use tracing::{error, warn};

use crate::config::{ConfigStore, RuneConfig, State};
use crate::errors::RuneError;
use crate::pipeline::{PipelineManager, Pipelines};
use crate::scribe::{CaptureOutcome, CaptureRequest};
use crate::vault::{ScoreVault, VaultAdapter};

/// Total wall-clock budget for one tool call.
const CALL_BUDGET: Duration = Duration::from_secs(60);

/// Consecutive Vault policy denials that demote the plugin to dormant.
const POLICY_DENIAL_WINDOW: u32 = 5;

/// The Rune MCP tool handler. Holds the pipeline manager, the mtime-cached
/// config view, and the policy-denial counter for auto-demotion.
#[derive(Clone)]
pub struct RuneTools {
    tool_router: ToolRouter<Self>,
    manager: Arc<PipelineManager>,
    config_store: Arc<ConfigStore>,
    policy_denials: Arc<AtomicU32>,
}

#[tool_router]
impl RuneTools {
    pub fn new(manager: Arc<PipelineManager>, config_store: Arc<ConfigStore>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            manager,
            config_store,
            policy_denials: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Capture a significant decision into encrypted organizational memory.
    #[tool(description = "Capture a significant organizational decision into encrypted memory. \
        Runs a 3-tier pipeline: embedding similarity filter, LLM policy filter, structured \
        extraction. Only text that passes the cascade is stored.")]
    async fn capture(&self, Parameters(params): Parameters<CaptureParams>) -> Result<String, String> {
        if !self.config_store.is_active() {
            return Ok(error_envelope(&RuneError::Dormant));
        }

        let pipelines = match self.pipelines().await {
            Ok(p) => p,
            Err(e) => return Ok(self.fail(&e).await),
        };

        tracing::info!(text_len = params.text.len(), "capture called");
        let request = CaptureRequest {
            text: params.text,
            source: params.source.or_else(|| Some("claude_agent".into())),
            user: params.user,
            channel: params.channel,
        };

        let result = tokio::time::timeout(CALL_BUDGET, pipelines.scribe.capture(request)).await;
        let envelope = match result {
            Err(_) => with_captured_false(error_envelope(&RuneError::Timeout)),
            Ok(Err(e)) => with_captured_false(self.fail(&e).await),
            Ok(Ok(outcome)) => {
                self.policy_denials.store(0, Ordering::SeqCst);
                match outcome {
                    CaptureOutcome::Captured { record_id } => {
                        json!({"ok": true, "captured": true, "record_id": record_id}).to_string()
                    }
                    CaptureOutcome::Skipped { reason } => {
                        json!({"ok": true, "captured": false, "reason": reason}).to_string()
                    }
                }
            }
        };
        Ok(envelope)
    }

    /// Search organizational memory and synthesize a cited answer.
    #[tool(description = "Search organizational memory for past decisions, context, and \
        insights. Expands the query, searches encrypted vector memory, and synthesizes a \
        cited answer that respects each record's evidence certainty.")]
    async fn recall(&self, Parameters(params): Parameters<RecallParams>) -> Result<String, String> {
        if !self.config_store.is_active() {
            return Ok(error_envelope(&RuneError::Dormant));
        }

        let pipelines = match self.pipelines().await {
            Ok(p) => p,
            Err(e) => return Ok(self.fail(&e).await),
        };

        tracing::info!(query = %params.query, topk = ?params.topk, "recall called");
        let result = tokio::time::timeout(
            CALL_BUDGET,
            pipelines.retriever.recall(&params.query, params.topk),
        )
        .await;

        let envelope = match result {
            Err(_) => error_envelope(&RuneError::Timeout),
            Ok(Err(e)) => self.fail(&e).await,
            Ok(Ok(answer)) => {
                self.policy_denials.store(0, Ordering::SeqCst);
                let mut value =
                    serde_json::to_value(&answer).map_err(|e| format!("serialization: {e}"))?;
                value["ok"] = json!(true);
                value.to_string()
            }
        };
        Ok(envelope)
    }

    /// Report Vault reachability and security mode.
    #[tool(description = "Check Rune-Vault connection status and security mode.")]
    async fn vault_status(&self) -> Result<String, String> {
        let status = match self.manager.current().await {
            Some(pipelines) => pipelines.vault.status().await,
            None => {
                // No live pipelines (dormant or never built): probe with a
                // transient adapter from the current config.
                match RuneConfig::load() {
                    Ok(config) if !config.vault.endpoint.is_empty() => {
                        VaultAdapter::new(&config.vault.endpoint, config.vault.token.clone())
                            .status()
                            .await
                    }
                    _ => {
                        return Ok(json!({
                            "ok": true,
                            "reachable": false,
                            "security_mode": "unconfigured",
                        })
                        .to_string())
                    }
                }
            }
        };

        Ok(json!({
            "ok": true,
            "reachable": status.reachable,
            "security_mode": status.security_mode,
        })
        .to_string())
    }

    /// Re-read config and rebuild the pipelines atomically.
    #[tool(description = "Re-read ~/.rune/config.json and reinitialize the capture/recall \
        pipelines. Call after activation or any configuration change.")]
    async fn reload_pipelines(&self) -> Result<String, String> {
        self.config_store.invalidate();
        let config = match RuneConfig::load_from(self.config_store.path()) {
            Ok(config) => config,
            Err(e) => {
                return Ok(error_envelope(&RuneError::Internal(format!(
                    "config load failed: {e}"
                ))))
            }
        };

        match self.manager.reload(&config).await {
            Ok(report) => {
                let mut value =
                    serde_json::to_value(&report).map_err(|e| format!("serialization: {e}"))?;
                value["ok"] = json!(true);
                Ok(value.to_string())
            }
            Err(e) => {
                warn!(%e, "reload failed, previous pipelines remain active");
                Ok(error_envelope(&RuneError::Internal(e.to_string())))
            }
        }
    }
}

impl RuneTools {
    /// Fetch the current pipeline generation, lazily building it when the
    /// plugin was activated after startup.
    async fn pipelines(&self) -> Result<Arc<Pipelines>, RuneError> {
        if let Some(pipelines) = self.manager.current().await {
            return Ok(pipelines);
        }

        let config = RuneConfig::load_from(self.config_store.path())
            .map_err(|e| RuneError::Internal(format!("config load failed: {e}")))?;
        if config.state != State::Active {
            return Err(RuneError::Dormant);
        }
        self.manager
            .reload(&config)
            .await
            .map_err(|e| RuneError::Internal(e.to_string()))?;
        self.manager
            .current()
            .await
            .ok_or_else(|| RuneError::Internal("pipelines unavailable after reload".into()))
    }

    /// Render a failure envelope, tracking consecutive policy denials. A
    /// Vault that rejects every call across the window is a categorical
    /// infrastructure failure: the plugin demotes itself to dormant and
    /// persists the change.
    async fn fail(&self, err: &RuneError) -> String {
        if matches!(err, RuneError::PolicyDenied(_)) {
            let denials = self.policy_denials.fetch_add(1, Ordering::SeqCst) + 1;
            if denials >= POLICY_DENIAL_WINDOW {
                self.demote_to_dormant(denials).await;
            }
        } else if !matches!(err, RuneError::Dormant) {
            self.policy_denials.store(0, Ordering::SeqCst);
        }
        error_envelope(err)
    }

    async fn demote_to_dormant(&self, denials: u32) {
        error!(
            denials,
            "vault denied every call over the window — demoting to dormant"
        );
        match RuneConfig::load_from(self.config_store.path()) {
            Ok(mut config) => {
                config.state = State::Dormant;
                if let Err(e) = config.save_to(self.config_store.path()) {
                    error!(%e, "failed to persist dormant state");
                }
                self.config_store.invalidate();
                // Tear down so no further adapter calls happen.
                let _ = self.manager.reload(&config).await;
                self.policy_denials.store(0, Ordering::SeqCst);
            }
            Err(e) => error!(%e, "failed to load config for demotion"),
        }
    }
}

/// Mark a capture failure envelope as not-captured.
fn with_captured_false(envelope: String) -> String {
    match serde_json::from_str::<serde_json::Value>(&envelope) {
        Ok(mut value) => {
            value["captured"] = json!(false);
            value.to_string()
        }
        Err(_) => envelope,
    }
}

/// Render an error as the standard failure envelope. Internal errors get an
/// opaque id that correlates with a stderr log line.
fn error_envelope(err: &RuneError) -> String {
    match err {
        RuneError::Internal(detail) => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            let id = &id[..8];
            error!(error_id = id, detail = %detail, "internal error");
            json!({"ok": false, "error": "internal", "detail": id}).to_string()
        }
        other => json!({
            "ok": false,
            "error": other.kind(),
            "detail": other.to_string(),
        })
        .to_string(),
    }
}

#[tool_handler]
impl ServerHandler for RuneTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Rune is an encrypted organizational memory server. Use capture to store \
                 significant decisions, recall to ask questions about past decisions, \
                 vault_status to check the trust boundary, and reload_pipelines after \
                 configuration changes."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
