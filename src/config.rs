//! Configuration loading, saving, and the activation state gate.
//!
//! The single source of truth is `~/.rune/config.json` (user-only readable).
//! Environment variables override any LLM key or provider; values sourced
//! from the environment are never written back to disk on [`RuneConfig::save`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{info, warn};

/// Plugin activation state. Capture and recall only run when `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Active,
    #[default]
    Dormant,
}

impl State {
    pub fn is_active(&self) -> bool {
        matches!(self, State::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    /// gRPC target: `host:port`, `tcp://host:port`, or `http(s)://host[:port]`.
    pub endpoint: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnVectorConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Team index provisioned for this tenant.
    pub index: String,
}

impl Default for EnVectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:50050".into(),
            api_key: String::new(),
            index: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub cache_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_rune_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            model: "paraphrase-multilingual-MiniLM-L12-v2".into(),
            cache_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Primary provider for extraction, query planning, and synthesis.
    pub provider: String,
    /// Provider for the Tier-2 policy filter (usually a cheaper model).
    pub tier2_provider: String,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_tier2_model: String,
    pub google_api_key: String,
    pub google_model: String,
    pub google_tier2_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            tier2_provider: "anthropic".into(),
            anthropic_api_key: String::new(),
            anthropic_model: "claude-sonnet-4-20250514".into(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".into(),
            openai_tier2_model: String::new(),
            google_api_key: String::new(),
            google_model: "gemini-2.0-flash-exp".into(),
            google_tier2_model: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    pub tier2_enabled: bool,
    /// Tier 1 noise floor: max exemplar similarity below this drops the text.
    pub similarity_threshold: f32,
    /// Tier 1 duplicate ceiling against recently captured embeddings.
    pub duplicate_threshold: f32,
    /// Similarity at or above this skips the Tier-2 policy filter.
    pub auto_capture_threshold: f32,
    /// Bound on the recent-capture exemplar cache.
    pub exemplar_cache_size: usize,
    /// Markdown file with team-specific trigger phrases.
    pub patterns_path: String,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            tier2_enabled: true,
            similarity_threshold: 0.35,
            duplicate_threshold: 0.95,
            auto_capture_threshold: 0.8,
            exemplar_cache_size: 64,
            patterns_path: "~/.rune/patterns.md".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Upper bound on per-call topk (the Vault enforces 10 server-side).
    pub topk: usize,
    pub confidence_threshold: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            topk: 10,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

/// Top-level Rune configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuneConfig {
    pub state: State,
    pub vault: VaultConfig,
    pub envector: EnVectorConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub scribe: ScribeConfig,
    pub retriever: RetrieverConfig,
    pub server: ServerConfig,

    /// Field names whose values came from the environment. Blanked on save
    /// so secrets never reach disk.
    #[serde(skip)]
    env_sourced: HashSet<&'static str>,
}

/// Returns `~/.rune/`.
pub fn default_rune_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".rune")
}

/// Returns the default config file path: `~/.rune/config.json`.
pub fn default_config_path() -> PathBuf {
    default_rune_dir().join("config.json")
}

/// Returns the logs directory next to the config file.
pub fn logs_dir() -> PathBuf {
    default_rune_dir().join("logs")
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

impl RuneConfig {
    /// Load config from `~/.rune/config.json` then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env overrides and resolve the
    /// `auto` provider token.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            serde_json::from_str(&contents).context("failed to parse config JSON")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RuneConfig::default()
        };

        config.apply_env_overrides();
        config.resolve_auto_providers();
        Ok(config)
    }

    /// Apply environment variable overrides, recording which LLM fields were
    /// env-sourced so `save` can blank them.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RUNEVAULT_ENDPOINT") {
            self.vault.endpoint = val;
        }
        if let Ok(val) = std::env::var("RUNEVAULT_TOKEN") {
            self.vault.token = val;
        }
        if let Ok(val) = std::env::var("ENVECTOR_ENDPOINT") {
            self.envector.endpoint = val;
        }
        if let Ok(val) = std::env::var("ENVECTOR_API_KEY") {
            self.envector.api_key = val;
        }
        if let Ok(val) = std::env::var("RUNE_STATE") {
            match val.as_str() {
                "active" => self.state = State::Active,
                "dormant" => self.state = State::Dormant,
                other => warn!(value = other, "ignoring invalid RUNE_STATE"),
            }
        }
        if let Ok(val) = std::env::var("RUNE_LOG_LEVEL") {
            self.server.log_level = val;
        }

        let llm_env: [(&str, &'static str); 6] = [
            ("RUNE_LLM_PROVIDER", "provider"),
            ("RUNE_TIER2_LLM_PROVIDER", "tier2_provider"),
            ("ANTHROPIC_API_KEY", "anthropic_api_key"),
            ("OPENAI_API_KEY", "openai_api_key"),
            ("GOOGLE_API_KEY", "google_api_key"),
            ("GEMINI_API_KEY", "google_api_key"),
        ];
        for (var, field) in llm_env {
            let Ok(val) = std::env::var(var) else { continue };
            if val.is_empty() {
                continue;
            }
            match field {
                "provider" => self.llm.provider = val,
                "tier2_provider" => self.llm.tier2_provider = val,
                "anthropic_api_key" => self.llm.anthropic_api_key = val,
                "openai_api_key" => self.llm.openai_api_key = val,
                "google_api_key" => self.llm.google_api_key = val,
                _ => unreachable!(),
            }
            self.env_sourced.insert(field);
        }
    }

    /// Resolve `"auto"` provider tokens before any client is constructed:
    /// the first provider with a configured key wins, in anthropic, openai,
    /// google order.
    fn resolve_auto_providers(&mut self) {
        let resolved = self.first_configured_provider();
        if self.llm.provider == "auto" {
            self.llm.provider = resolved.to_string();
            info!(provider = resolved, "resolved auto LLM provider");
        }
        if self.llm.tier2_provider == "auto" {
            self.llm.tier2_provider = resolved.to_string();
        }
    }

    fn first_configured_provider(&self) -> &'static str {
        if !self.llm.anthropic_api_key.is_empty() {
            "anthropic"
        } else if !self.llm.openai_api_key.is_empty() {
            "openai"
        } else if !self.llm.google_api_key.is_empty() {
            "google"
        } else {
            "anthropic"
        }
    }

    /// True if at least one LLM provider has an API key configured.
    pub fn has_llm_key(&self) -> bool {
        !self.llm.anthropic_api_key.is_empty()
            || !self.llm.openai_api_key.is_empty()
            || !self.llm.google_api_key.is_empty()
    }

    /// Fields that must be populated before `state` may be `active`.
    /// Returns the missing ones; empty means the invariant holds.
    pub fn missing_for_active(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.vault.endpoint.is_empty() {
            missing.push("vault.endpoint");
        }
        if self.vault.token.is_empty() {
            missing.push("vault.token");
        }
        if self.envector.endpoint.is_empty() {
            missing.push("envector.endpoint");
        }
        if self.envector.api_key.is_empty() {
            missing.push("envector.api_key");
        }
        if self.envector.index.is_empty() {
            missing.push("envector.index");
        }
        if !self.has_llm_key() {
            missing.push("llm.<provider>_api_key");
        }
        missing
    }

    /// Persist to the default path. Env-sourced API keys are written as
    /// empty strings. The file ends up user-only readable on POSIX.
    pub fn save(&self) -> Result<()> {
        self.save_to(default_config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut on_disk = self.clone();
        for field in &self.env_sourced {
            match *field {
                "anthropic_api_key" => on_disk.llm.anthropic_api_key.clear(),
                "openai_api_key" => on_disk.llm.openai_api_key.clear(),
                "google_api_key" => on_disk.llm.google_api_key.clear(),
                // provider selections are not secrets; persist them as-is
                _ => {}
            }
        }

        let json = serde_json::to_string_pretty(&on_disk)?;
        std::fs::write(path, json).context("failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("failed to set config permissions")?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn mark_env_sourced(&mut self, field: &'static str) {
        self.env_sourced.insert(field);
    }
}

/// Mtime-cached view over the config file, used by the state gate on every
/// tool call. Re-reads the file only when its mtime changes.
pub struct ConfigStore {
    path: PathBuf,
    cached: Mutex<Option<(SystemTime, State)>>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: Mutex::new(None),
        }
    }

    pub fn at_default_path() -> Self {
        Self::new(default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current activation state, cached by file mtime. A missing or
    /// unreadable file reads as dormant.
    pub fn is_active(&self) -> bool {
        self.state() == State::Active
    }

    pub fn state(&self) -> State {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        let mut cached = self.cached.lock().expect("config cache lock poisoned");
        if let (Some(mtime), Some((seen, state))) = (mtime, *cached) {
            if mtime == seen {
                return state;
            }
        }

        let state = RuneConfig::load_from(&self.path)
            .map(|c| c.state)
            .unwrap_or(State::Dormant);
        if let Some(mtime) = mtime {
            *cached = Some((mtime, state));
        } else {
            *cached = None;
        }
        state
    }

    /// Drop the cached state so the next check re-reads the file.
    pub fn invalidate(&self) {
        *self.cached.lock().expect("config cache lock poisoned") = None;
    }
}
