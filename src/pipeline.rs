//! Pipeline construction and atomic reload.
//!
//! A [`Pipelines`] generation bundles everything built from one config
//! snapshot: the store and Vault adapters, LLM clients, and the two
//! pipelines. Reload builds a complete new generation first and only then
//! swaps it in — a failed build leaves the previous generation serving, and
//! no request ever observes a partially-initialized pipeline.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{RuneConfig, State};
use crate::embedding::EmbeddingProvider;
use crate::envector::{EnVectorAdapter, VectorStore};
use crate::llm::{self, TextGenerator};
use crate::retriever::{query::QueryPlanner, synthesize::Synthesizer, Retriever};
use crate::scribe::{
    tier1::{Tier1Filter, Tier1Thresholds},
    tier2::PolicyFilter,
    tier3::Extractor,
    triggers, Scribe,
};
use crate::vault::{ScoreVault, VaultAdapter};

/// One fully-built pipeline generation.
pub struct Pipelines {
    pub scribe: Scribe,
    pub retriever: Retriever,
    pub vault: Arc<dyn ScoreVault>,
    pub generation: u64,
    /// Fingerprint of the config snapshot this generation was built from.
    /// Identical fingerprints across reloads mean identical internal state.
    pub fingerprint: u64,
}

/// Result of a reload, serialized into the tool response.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub state: State,
    pub generation: u64,
    pub rebuilt: bool,
}

/// Holds the current generation behind an RwLock; tool calls clone the Arc
/// out and never hold the lock across their own awaits.
pub struct PipelineManager {
    embedder: Arc<dyn EmbeddingProvider>,
    current: RwLock<Option<Arc<Pipelines>>>,
    generation: AtomicU64,
}

impl PipelineManager {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn current(&self) -> Option<Arc<Pipelines>> {
        self.current.read().await.clone()
    }

    /// Rebuild from a config snapshot. Dormant state tears the pipelines
    /// down; an invalid active config is an error that leaves the previous
    /// generation in place. Unchanged config skips the rebuild entirely
    /// (reload is idempotent).
    pub async fn reload(&self, config: &RuneConfig) -> Result<ReloadReport> {
        if config.state != State::Active {
            let mut slot = self.current.write().await;
            if slot.take().is_some() {
                info!("pipelines torn down (state is dormant)");
            }
            return Ok(ReloadReport {
                state: config.state,
                generation: self.generation.load(Ordering::SeqCst),
                rebuilt: false,
            });
        }

        let missing = config.missing_for_active();
        if !missing.is_empty() {
            anyhow::bail!(
                "state is active but config is incomplete (missing: {})",
                missing.join(", ")
            );
        }

        let fingerprint = config_fingerprint(config);
        if let Some(existing) = self.current.read().await.as_ref() {
            if existing.fingerprint == fingerprint {
                debug!(
                    generation = existing.generation,
                    fingerprint, "config unchanged, keeping current pipelines"
                );
                return Ok(ReloadReport {
                    state: State::Active,
                    generation: existing.generation,
                    rebuilt: false,
                });
            }
        }

        // Build the whole generation before touching the active slot.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let built = self
            .build(config, generation, fingerprint)
            .await
            .context("pipeline build failed")?;

        let mut slot = self.current.write().await;
        *slot = Some(Arc::new(built));
        info!(generation, fingerprint, "pipelines rebuilt");

        Ok(ReloadReport {
            state: State::Active,
            generation,
            rebuilt: true,
        })
    }

    async fn build(
        &self,
        config: &RuneConfig,
        generation: u64,
        fingerprint: u64,
    ) -> Result<Pipelines> {
        let store: Arc<dyn VectorStore> = Arc::new(EnVectorAdapter::new(
            &config.envector.endpoint,
            config.envector.api_key.clone(),
        ));
        let vault: Arc<dyn ScoreVault> = Arc::new(VaultAdapter::new(
            &config.vault.endpoint,
            config.vault.token.clone(),
        ));

        let primary: Arc<dyn TextGenerator> = Arc::new(llm::primary_client(&config.llm));
        let tier2_llm: Arc<dyn TextGenerator> = Arc::new(llm::tier2_client(&config.llm));

        // Tier 1: thresholds from config, trigger phrases from the built-in
        // table plus the team pattern file, all embedded as seed exemplars.
        let mut phrases = triggers::builtin_phrases();
        let pattern_path = crate::config::expand_tilde(&config.scribe.patterns_path);
        match triggers::parse_pattern_file(&pattern_path) {
            Ok(custom) if !custom.is_empty() => {
                info!(count = custom.len(), path = %pattern_path.display(), "loaded team capture patterns");
                phrases.extend(custom);
            }
            Ok(_) => {}
            Err(e) => warn!(%e, "ignoring unreadable pattern file"),
        }

        let tier1 = Tier1Filter::new(
            config.scribe.exemplar_cache_size,
            Tier1Thresholds {
                similarity: config.scribe.similarity_threshold,
                duplicate: config.scribe.duplicate_threshold,
                auto_capture: config.scribe.auto_capture_threshold,
            },
            phrases.clone(),
        );
        let seeds = self.embed_trigger_seeds(phrases).await?;
        debug!(count = seeds.len(), "tier1 exemplar seeds embedded");
        tier1.seed(seeds);

        let tier2 = if config.scribe.tier2_enabled {
            Some(PolicyFilter::new(Arc::clone(&tier2_llm)))
        } else {
            None
        };
        let tier3 = Extractor::new(Arc::clone(&primary));

        let scribe = Scribe::new(
            Arc::clone(&self.embedder),
            tier1,
            tier2,
            tier3,
            Arc::clone(&store),
            config.envector.index.clone(),
        );

        let retriever = Retriever::new(
            Arc::clone(&self.embedder),
            Arc::clone(&store),
            Arc::clone(&vault),
            QueryPlanner::new(Arc::clone(&primary)),
            Synthesizer::new(Arc::clone(&primary)),
            config.envector.index.clone(),
            config.retriever.topk,
            config.retriever.confidence_threshold,
        );

        if !primary.is_available() {
            warn!("no LLM available — extraction and synthesis will degrade");
        }

        Ok(Pipelines {
            scribe,
            retriever,
            vault,
            generation,
            fingerprint,
        })
    }

    async fn embed_trigger_seeds(&self, phrases: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || {
            let texts: Vec<&str> = phrases.iter().map(String::as_str).collect();
            embedder.embed_batch(&texts)
        })
        .await
        .context("trigger seeding task failed")?
        .context("trigger seeding failed")
    }
}

/// Hash of the pipeline-relevant config sections. Changing an unrelated
/// field (e.g. log level) does not force a rebuild.
fn config_fingerprint(config: &RuneConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.envector.endpoint.hash(&mut hasher);
    config.envector.api_key.hash(&mut hasher);
    config.envector.index.hash(&mut hasher);
    config.vault.endpoint.hash(&mut hasher);
    config.vault.token.hash(&mut hasher);
    config.llm.provider.hash(&mut hasher);
    config.llm.tier2_provider.hash(&mut hasher);
    config.llm.anthropic_api_key.hash(&mut hasher);
    config.llm.anthropic_model.hash(&mut hasher);
    config.llm.openai_api_key.hash(&mut hasher);
    config.llm.openai_model.hash(&mut hasher);
    config.llm.openai_tier2_model.hash(&mut hasher);
    config.llm.google_api_key.hash(&mut hasher);
    config.llm.google_model.hash(&mut hasher);
    config.llm.google_tier2_model.hash(&mut hasher);
    config.scribe.tier2_enabled.hash(&mut hasher);
    config.scribe.patterns_path.hash(&mut hasher);
    config.scribe.similarity_threshold.to_bits().hash(&mut hasher);
    config.scribe.duplicate_threshold.to_bits().hash(&mut hasher);
    config.scribe.auto_capture_threshold.to_bits().hash(&mut hasher);
    config.scribe.exemplar_cache_size.hash(&mut hasher);
    config.retriever.topk.hash(&mut hasher);
    config
        .retriever
        .confidence_threshold
        .to_bits()
        .hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_log_level() {
        let mut a = RuneConfig::default();
        let mut b = RuneConfig::default();
        a.server.log_level = "debug".into();
        b.server.log_level = "trace".into();
        assert_eq!(config_fingerprint(&a), config_fingerprint(&b));
    }

    #[test]
    fn fingerprint_tracks_pipeline_fields() {
        let a = RuneConfig::default();
        let mut b = RuneConfig::default();
        b.scribe.similarity_threshold = 0.5;
        assert_ne!(config_fingerprint(&a), config_fingerprint(&b));

        let mut c = RuneConfig::default();
        c.envector.index = "other".into();
        assert_ne!(config_fingerprint(&a), config_fingerprint(&c));
    }
}
