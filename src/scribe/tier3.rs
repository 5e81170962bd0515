//! Tier 3 — structured extraction.
//!
//! One LLM call turns the raw utterance plus conversational hints into a
//! [`DecisionRecord`]. Extraction never drops a capture: if the model is
//! unavailable, errors out, or returns garbage, the utterance is preserved
//! as a minimal insight record with unknown certainty.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::llm::{parse_llm_json, GenerateOptions, TextGenerator};
use crate::record::{Certainty, DecisionRecord, Kind, SourceRef};

const EXTRACTION_SYSTEM: &str = "You are a structured information extractor for \
organizational decision records. The message may be in any language; all output \
values MUST be in English (translate if needed).

Respond with a valid JSON object with these keys:
- \"kind\": one of \"decision\", \"rationale\", \"policy\", \"lesson\", \"insight\"
- \"title\": short descriptive title, 5-120 characters
- \"body\": the decision and its context, self-contained, markdown allowed
- \"participants\": list of actors or roles mentioned (e.g. \"role:cto\", \"user:alice\")
- \"tags\": list of topic tags (e.g. [\"database\", \"migration\"])
- \"certainty\": \"supported\" only when the message itself states the reasoning;
  \"partially_supported\" when reasoning is implied; otherwise \"unknown\"

Rules:
- Do not invent facts that are not in the message.
- certainty cannot be \"supported\" without explicit reasoning in the message.
- If a field is not present in the text, use an empty string or empty list.";

/// Conversational hints carried alongside the raw text.
#[derive(Debug, Clone, Default)]
pub struct ExtractionHints {
    pub source: Option<String>,
    pub user: Option<String>,
    pub channel: Option<String>,
}

/// LLM-backed record extractor.
pub struct Extractor {
    llm: Arc<dyn TextGenerator>,
}

impl Extractor {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }

    /// Extract a record from `text`. Degrades to [`DecisionRecord::minimal`]
    /// on any failure.
    pub async fn extract(&self, text: &str, hints: &ExtractionHints) -> DecisionRecord {
        let mut record = if self.llm.is_available() {
            match self.extract_with_llm(text).await {
                Some(record) => record,
                None => {
                    debug!("tier3 extraction failed, storing minimal record");
                    DecisionRecord::minimal(text)
                }
            }
        } else {
            DecisionRecord::minimal(text)
        };

        apply_hints(&mut record, hints);
        record
    }

    async fn extract_with_llm(&self, text: &str) -> Option<DecisionRecord> {
        let mut prompt = String::new();
        if let Some(name) = crate::language::detect(text).name() {
            prompt.push_str(&format!("The message appears to be written in {name}.\n"));
        }
        prompt.push_str("Message to extract from:\n");
        prompt.push_str(text);
        let opts = GenerateOptions {
            system: Some(EXTRACTION_SYSTEM.to_string()),
            max_tokens: Some(1024),
            timeout: Some(Duration::from_secs(30)),
            temperature: Some(0.0),
        };

        let raw = self.llm.generate(&prompt, &opts).await.ok()?;
        let value = parse_llm_json(&raw);
        record_from_value(&value, text)
    }
}

/// Build a record from extractor JSON. Returns `None` when the response is
/// too broken to use (no title and no body).
fn record_from_value(value: &Value, original_text: &str) -> Option<DecisionRecord> {
    let title = value.get("title").and_then(|v| v.as_str()).unwrap_or("");
    let body = value.get("body").and_then(|v| v.as_str()).unwrap_or("");
    if title.is_empty() && body.is_empty() {
        return None;
    }

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Kind>().ok())
        .unwrap_or(Kind::Insight);

    let title = if title.is_empty() {
        body.chars().take(120).collect::<String>()
    } else {
        title.to_string()
    };
    let body = if body.is_empty() {
        original_text.to_string()
    } else {
        body.to_string()
    };

    let mut record = DecisionRecord::new(kind, title, body);
    record.certainty = value
        .get("certainty")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Certainty>().ok())
        .unwrap_or(Certainty::Unknown);
    record.participants = string_list(value.get("participants"));
    record.tags = string_list(value.get("tags"));
    Some(record)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn apply_hints(record: &mut DecisionRecord, hints: &ExtractionHints) {
    if let Some(source) = &hints.source {
        record.sources.push(SourceRef {
            origin: source.clone(),
            reference: hints.channel.clone(),
        });
    }
    if let Some(user) = &hints.user {
        let tagged = format!("user:{user}");
        if !record.participants.contains(&tagged) {
            record.participants.push(tagged);
        }
    }
}
