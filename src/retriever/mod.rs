//! Recall pipeline (Retriever).
//!
//! Query planning, parallel encrypted search with Vault-mediated score
//! decryption, deterministic merge, metadata hydration, and certainty-
//! respecting synthesis. Transport failures surface as errors without
//! partial data; a missing LLM degrades planning and synthesis but never
//! blocks retrieval.

pub mod query;
pub mod search;
pub mod synthesize;

use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::envector::VectorStore;
use crate::errors::RuneError;
use crate::record::Certainty;
use crate::vault::ScoreVault;
use query::QueryPlanner;
use synthesize::Synthesizer;

/// Hard per-call cap, matching the Vault's server-side policy.
pub const TOPK_CAP: usize = 10;

/// Default `topk` when the caller does not pass one.
pub const TOPK_DEFAULT: usize = 5;

/// One cited source in a recall answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub id: String,
    pub title: String,
    pub certainty: Certainty,
}

/// The complete recall result handed to the tool layer.
#[derive(Debug, Clone, Serialize)]
pub struct RecallAnswer {
    pub found: usize,
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub confidence: f32,
    pub warnings: Vec<String>,
    pub related_queries: Vec<String>,
}

/// The recall pipeline. Immutable after construction.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    vault: Arc<dyn ScoreVault>,
    planner: QueryPlanner,
    synthesizer: Synthesizer,
    index: String,
    topk_cap: usize,
    confidence_threshold: f32,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        vault: Arc<dyn ScoreVault>,
        planner: QueryPlanner,
        synthesizer: Synthesizer,
        index: String,
        topk_cap: usize,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            embedder,
            store,
            vault,
            planner,
            synthesizer,
            index,
            topk_cap: topk_cap.clamp(1, TOPK_CAP),
            confidence_threshold,
        }
    }

    /// Run a recall. `topk` defaults to [`TOPK_DEFAULT`] and must lie in
    /// `[1, topk_cap]` (the cap is the configured limit, itself bounded by
    /// the Vault's per-call policy of [`TOPK_CAP`]).
    pub async fn recall(
        &self,
        question: &str,
        topk: Option<usize>,
    ) -> Result<RecallAnswer, RuneError> {
        let topk = topk.unwrap_or(TOPK_DEFAULT.min(self.topk_cap));
        if topk == 0 || topk > self.topk_cap {
            return Err(RuneError::BadArgument(format!(
                "topk must be between 1 and {}, got {topk}",
                self.topk_cap
            )));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(RuneError::Empty);
        }

        // 1. Plan (LLM or deterministic fallback)
        let plan = self.planner.plan(question).await;

        // 2-4. Parallel encrypted search + merge
        let survivors = search::fan_out(
            &plan.queries,
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
            Arc::clone(&self.vault),
            &self.index,
            topk,
        )
        .await?;

        // 5. Hydrate metadata through the Vault
        let candidates = search::hydrate(
            &survivors,
            Arc::clone(&self.store),
            Arc::clone(&self.vault),
            &self.index,
        )
        .await?;

        // 6. Confidence
        let confidence = search::confidence(&survivors);
        let mut warnings = Vec::new();
        if candidates.is_empty() {
            warnings.push("no_results".to_string());
        } else if confidence < self.confidence_threshold {
            warnings.push("low_confidence".to_string());
        }

        // 7. Synthesis (degrades without an LLM)
        let synthesis = self
            .synthesizer
            .synthesize(question, &plan.intent, &plan.entities, &candidates)
            .await;

        let sources: Vec<SourceCitation> = candidates
            .iter()
            .map(|c| SourceCitation {
                id: c.record.id.clone(),
                title: c.record.title.clone(),
                certainty: c.record.certainty,
            })
            .collect();

        Ok(RecallAnswer {
            found: candidates.len(),
            answer: synthesis.answer,
            sources,
            confidence,
            warnings,
            related_queries: synthesis.related_queries,
        })
    }
}
