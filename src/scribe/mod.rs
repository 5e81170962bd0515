//! Capture pipeline (Scribe).
//!
//! Three-stage cascade from a raw agent utterance to an encrypted record:
//! Tier 1 similarity filter (no tokens), Tier 2 LLM policy filter
//! (fail-open), Tier 3 LLM structured extraction (degrades, never drops).
//! The tiers run strictly in order within a call; the only shared mutable
//! state is the Tier-1 exemplar cache.

pub mod tier1;
pub mod tier2;
pub mod tier3;
pub mod triggers;

use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::envector::VectorStore;
use crate::errors::RuneError;
use tier1::{Tier1Decision, Tier1Filter};
use tier2::PolicyFilter;
use tier3::{ExtractionHints, Extractor};

/// One capture request from the tool surface.
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    pub text: String,
    pub source: Option<String>,
    pub user: Option<String>,
    pub channel: Option<String>,
}

/// Outcome of a capture attempt that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured { record_id: String },
    Skipped { reason: String },
}

/// The capture pipeline. Immutable after construction apart from the
/// Tier-1 cache.
pub struct Scribe {
    embedder: Arc<dyn EmbeddingProvider>,
    tier1: Tier1Filter,
    tier2: Option<PolicyFilter>,
    tier3: Extractor,
    store: Arc<dyn VectorStore>,
    index: String,
}

impl Scribe {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        tier1: Tier1Filter,
        tier2: Option<PolicyFilter>,
        tier3: Extractor,
        store: Arc<dyn VectorStore>,
        index: String,
    ) -> Self {
        Self {
            embedder,
            tier1,
            tier2,
            tier3,
            store,
            index,
        }
    }

    /// Access to the Tier-1 filter for seeding at pipeline build.
    pub fn tier1(&self) -> &Tier1Filter {
        &self.tier1
    }

    /// Run the full cascade. Store failures are fatal for the call; every
    /// other failure degrades inside its tier.
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureOutcome, RuneError> {
        let text = request.text.trim().to_string();
        if text.len() < 2 {
            return Ok(CaptureOutcome::Skipped {
                reason: "empty".into(),
            });
        }

        // Embed (CPU-bound, off the async threads)
        let embedder = Arc::clone(&self.embedder);
        let text_for_embed = text.clone();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text_for_embed))
            .await
            .map_err(|e| RuneError::Internal(format!("embedding task failed: {e}")))?
            .map_err(|e| RuneError::Internal(format!("embedding failed: {e}")))?;

        // Tier 1
        let tier1 = self.tier1.evaluate(&text, &embedding);
        let (similarity, skip_tier2) = match tier1 {
            Tier1Decision::Duplicate { similarity } => {
                debug!(similarity, "tier1 duplicate");
                return Ok(CaptureOutcome::Skipped {
                    reason: "duplicate".into(),
                });
            }
            Tier1Decision::Noise { max_similarity } => {
                debug!(max_similarity, "tier1 below threshold");
                return Ok(CaptureOutcome::Skipped {
                    reason: "below_threshold".into(),
                });
            }
            Tier1Decision::Pass {
                max_similarity,
                auto_capture,
                trigger_rescued,
            } => {
                debug!(max_similarity, auto_capture, trigger_rescued, "tier1 pass");
                (max_similarity, auto_capture)
            }
        };

        // Tier 2 (skipped on a very strong Tier-1 match)
        if !skip_tier2 {
            if let Some(filter) = &self.tier2 {
                let verdict = filter.evaluate(&text, similarity).await;
                if !verdict.capture {
                    self.tier1.observe(embedding, false);
                    return Ok(CaptureOutcome::Skipped {
                        reason: verdict.reason,
                    });
                }
            }
        }

        // Tier 3 — always runs once the pipeline reaches it
        let hints = ExtractionHints {
            source: request.source.clone(),
            user: request.user.clone(),
            channel: request.channel.clone(),
        };
        let record = self.tier3.extract(&text, &hints).await;

        // Insert: the adapter encrypts both the vector and the metadata
        // before anything leaves the process.
        let record_json = serde_json::to_string(&record)
            .map_err(|e| RuneError::Internal(format!("record serialization failed: {e}")))?;
        self.store
            .ensure_index(&self.index, self.embedder.dimensions())
            .await
            .map_err(RuneError::from)?;
        self.store
            .insert(&self.index, &embedding, &record_json)
            .await
            .map_err(RuneError::from)?;

        self.tier1.observe(embedding, true);
        info!(record_id = %record.id, kind = %record.kind, "decision captured");

        Ok(CaptureOutcome::Captured {
            record_id: record.id,
        })
    }
}
