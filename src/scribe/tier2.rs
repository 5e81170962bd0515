//! Tier 2 — LLM policy filter.
//!
//! A small, fast model judges whether a Tier-1 candidate is truly worth
//! keeping as organizational memory. This tier fails open: a transport
//! error, a timeout, or an unparseable response must never silently drop a
//! decision, so every failure path resolves to "capture".

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::llm::{parse_llm_json, GenerateOptions, TextGenerator};

const POLICY: &str = "You judge whether a workplace message contains a significant \
organizational decision, learning, or policy that should be permanently recorded.

CAPTURE if the message contains:
- A concrete decision with reasoning (technology choice, architecture, process change)
- A policy or standard being established or changed
- A trade-off analysis or rejection of an alternative
- A lesson learned from an incident or failure
- A commitment or agreement that affects the team

DO NOT CAPTURE:
- Casual conversation, greetings, or social chat
- Questions without answers or decisions
- Status updates without decisions
- Vague opinions without commitment
- Operational messages (deployments, alerts) without decisions

Respond with JSON only: {\"capture\": true/false, \"reason\": \"one sentence\"}";

/// Verdict of the policy filter.
#[derive(Debug, Clone)]
pub struct PolicyVerdict {
    pub capture: bool,
    pub reason: String,
}

/// LLM-backed capture judgment.
pub struct PolicyFilter {
    llm: Arc<dyn TextGenerator>,
}

impl PolicyFilter {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    pub fn is_available(&self) -> bool {
        self.llm.is_available()
    }

    /// Judge a candidate. `tier1_similarity` is passed as context so the
    /// model can weigh a borderline embedding match.
    pub async fn evaluate(&self, text: &str, tier1_similarity: f32) -> PolicyVerdict {
        if !self.is_available() {
            return PolicyVerdict {
                capture: true,
                reason: "policy filter unavailable, passing through".into(),
            };
        }

        let excerpt: String = text.chars().take(500).collect();
        let prompt = format!(
            "Message: {excerpt}\n(Embedding similarity to known decision phrasing: {tier1_similarity:.2})"
        );
        let opts = GenerateOptions {
            system: Some(POLICY.to_string()),
            max_tokens: Some(100),
            timeout: Some(Duration::from_secs(15)),
            temperature: Some(0.0),
        };

        let raw = match self.llm.generate(&prompt, &opts).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(%e, "tier2 generate failed, failing open");
                return PolicyVerdict {
                    capture: true,
                    reason: format!("policy filter error ({e}), defaulting to capture"),
                };
            }
        };

        let value = parse_llm_json(&raw);
        match value.get("capture").and_then(|v| v.as_bool()) {
            Some(capture) => PolicyVerdict {
                capture,
                reason: value
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            // parse failure: fail open
            None => PolicyVerdict {
                capture: true,
                reason: "unparseable policy response, defaulting to capture".into(),
            },
        }
    }
}
