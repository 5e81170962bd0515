//! Query planning — turn a user question into search strings.
//!
//! With an LLM available, a single call expands the question into a
//! [`QueryPlan`] (intent, entities, up to four query strings, translated to
//! English for embedding consistency). Without one, the plan degrades
//! deterministically to the original question alone.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::llm::{parse_llm_json, GenerateOptions, TextGenerator};

/// Maximum number of expanded queries searched per recall.
pub const MAX_QUERIES: usize = 4;

/// Intent the planner may report. Free-form string with `"generic"` as the
/// catch-all; the known values steer the synthesis prompt.
pub const KNOWN_INTENTS: &[&str] = &[
    "decision_rationale",
    "pattern_lookup",
    "technical_context",
    "historical_context",
    "attribution",
    "generic",
];

const PLAN_SYSTEM: &str = "You analyze a user question about organizational memory \
and produce a retrieval plan. The question may be in any language; all output \
values MUST be in English.

Respond with a valid JSON object:
{
  \"intent\": one of [\"decision_rationale\", \"pattern_lookup\", \"technical_context\", \"historical_context\", \"attribution\", \"generic\"],
  \"entities\": [\"named entities in the question\"],
  \"queries\": [\"1 to 4 short search strings, most literal first, including an English rendering of the question\"]
}";

/// Parsed retrieval plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub original: String,
    pub intent: String,
    pub entities: Vec<String>,
    /// 1..=MAX_QUERIES strings, original question first.
    pub queries: Vec<String>,
}

impl QueryPlan {
    /// The deterministic plan used when no LLM is configured or the LLM
    /// response is unusable.
    pub fn fallback(original: &str) -> Self {
        Self {
            original: original.to_string(),
            intent: "generic".into(),
            entities: Vec::new(),
            queries: vec![original.to_string()],
        }
    }
}

/// LLM-assisted query planner.
pub struct QueryPlanner {
    llm: Arc<dyn TextGenerator>,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    pub async fn plan(&self, question: &str) -> QueryPlan {
        if !self.llm.is_available() {
            return QueryPlan::fallback(question);
        }

        let opts = GenerateOptions {
            system: Some(PLAN_SYSTEM.to_string()),
            max_tokens: Some(256),
            timeout: Some(Duration::from_secs(15)),
            temperature: Some(0.0),
        };
        let prompt = match crate::language::detect(question).name() {
            Some(name) => format!(
                "The question appears to be written in {name}; include an English \
                 rendering among the queries.\n\nQuestion: {question}"
            ),
            None => question.to_string(),
        };
        let raw = match self.llm.generate(&prompt, &opts).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(%e, "query planning failed, using fallback plan");
                return QueryPlan::fallback(question);
            }
        };

        plan_from_value(question, &parse_llm_json(&raw))
    }
}

/// Validate and normalize a plan from LLM JSON; anything unusable falls back.
fn plan_from_value(question: &str, value: &Value) -> QueryPlan {
    let raw_queries: Vec<String> = value
        .get("queries")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|q| q.as_str())
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if raw_queries.is_empty() {
        return QueryPlan::fallback(question);
    }

    // Original first, case-insensitive dedup, bounded fan-out.
    let mut queries = vec![question.to_string()];
    for q in raw_queries {
        if queries.len() >= MAX_QUERIES {
            break;
        }
        if !queries.iter().any(|seen| seen.eq_ignore_ascii_case(&q)) {
            queries.push(q);
        }
    }

    let intent = value
        .get("intent")
        .and_then(|v| v.as_str())
        .filter(|i| KNOWN_INTENTS.contains(i))
        .unwrap_or("generic")
        .to_string();

    let entities = value
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|e| e.as_str())
                .map(str::to_string)
                .take(10)
                .collect()
        })
        .unwrap_or_default();

    QueryPlan {
        original: question.to_string(),
        intent,
        entities,
        queries,
    }
}
