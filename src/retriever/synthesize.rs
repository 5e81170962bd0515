//! Answer synthesis.
//!
//! The synthesizer turns decrypted records into a cited natural-language
//! answer. Two hard rules carry through from capture: each record's
//! certainty must be respected (never upgraded), and no record id may be
//! cited that was not in the input set — an answer containing an unknown id
//! is discarded in favor of the deterministic fallback.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::llm::{GenerateOptions, TextGenerator};
use crate::retriever::search::Candidate;

const SYNTHESIS_SYSTEM: &str = "You answer questions from organizational decision \
records. Follow these rules strictly:

1. ONLY use information from the provided records. Do NOT make up information.
2. Respect the certainty level of each record:
   - \"supported\": state it confidently
   - \"partially_supported\": qualify with \"likely\" or \"based on available evidence\"
   - \"unknown\": say explicitly that the evidence is uncertain
   Never present a record as more certain than its label.
3. Cite records by id in brackets, like [dec_2026-01-01_decision_ab12cd].
4. If the records do not answer the question, say so.
5. Be concise but complete.";

/// Synthesized answer plus deterministic extras.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    pub related_queries: Vec<String>,
}

pub struct Synthesizer {
    llm: Arc<dyn TextGenerator>,
    citation: Regex,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self {
            llm,
            citation: Regex::new(r"dec_\d{4}-\d{2}-\d{2}_[a-z]+_[0-9a-f]+")
                .expect("citation regex"),
        }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        intent: &str,
        entities: &[String],
        candidates: &[Candidate],
    ) -> Synthesis {
        let related_queries = suggest_related(entities, candidates);

        if candidates.is_empty() {
            return Synthesis {
                answer: "No relevant records found in organizational memory.".into(),
                related_queries,
            };
        }

        if self.llm.is_available() {
            match self.synthesize_with_llm(question, intent, candidates).await {
                Some(answer) => {
                    return Synthesis {
                        answer,
                        related_queries,
                    }
                }
                None => debug!("synthesis degraded to fallback answer"),
            }
        }

        Synthesis {
            answer: fallback_answer(candidates),
            related_queries,
        }
    }

    async fn synthesize_with_llm(
        &self,
        question: &str,
        intent: &str,
        candidates: &[Candidate],
    ) -> Option<String> {
        let mut prompt = format!("Question: {question}\nDetected intent: {intent}\n\nRecords:\n");
        for c in candidates {
            let body: String = c.record.body.chars().take(1000).collect();
            prompt.push_str(&format!(
                "---\nid: {}\ntitle: {}\nkind: {}\ncertainty: {}\nsimilarity: {:.2}\n{}\n",
                c.record.id, c.record.title, c.record.kind, c.record.certainty, c.similarity, body
            ));
        }
        prompt.push_str("---\n\nYour answer:");

        let opts = GenerateOptions {
            system: Some(SYNTHESIS_SYSTEM.to_string()),
            max_tokens: Some(1024),
            timeout: Some(Duration::from_secs(30)),
            temperature: None,
        };
        let answer = self.llm.generate(&prompt, &opts).await.ok()?;
        if answer.trim().is_empty() {
            return None;
        }

        // No hallucinated citations: every cited id must come from the
        // input set.
        let known: HashSet<&str> = candidates.iter().map(|c| c.record.id.as_str()).collect();
        for cited in self.citation.find_iter(&answer) {
            if !known.contains(cited.as_str()) {
                warn!(id = cited.as_str(), "synthesizer cited an unknown record id");
                return None;
            }
        }

        Some(answer)
    }
}

/// Deterministic degraded answer: concatenated titles.
pub fn fallback_answer(candidates: &[Candidate]) -> String {
    let titles: Vec<String> = candidates
        .iter()
        .map(|c| format!("{} [{}]", c.record.title, c.record.id))
        .collect();
    format!("Found: {}", titles.join("; "))
}

/// Follow-up suggestions derived from entities and result titles; no LLM.
fn suggest_related(entities: &[String], candidates: &[Candidate]) -> Vec<String> {
    let mut suggestions = Vec::new();
    for entity in entities.iter().take(2) {
        suggestions.push(format!("Why did we choose {entity}?"));
    }
    for c in candidates.iter().take(2) {
        let head: Vec<&str> = c.record.title.split_whitespace().take(3).collect();
        if !head.is_empty() {
            let suggestion = format!("What were the alternatives to {}?", head.join(" "));
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        }
    }
    suggestions.truncate(3);
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LlmError;
    use crate::record::{Certainty, DecisionRecord, Kind};
    use async_trait::async_trait;

    struct Scripted(Option<String>);

    #[async_trait]
    impl TextGenerator for Scripted {
        fn is_available(&self) -> bool {
            self.0.is_some()
        }

        async fn generate(
            &self,
            _prompt: &str,
            _opts: &GenerateOptions,
        ) -> Result<String, LlmError> {
            self.0.clone().ok_or(LlmError::NotAvailable)
        }
    }

    fn candidate(title: &str) -> Candidate {
        let mut record = DecisionRecord::new(Kind::Decision, title, "body text");
        record.certainty = Certainty::Supported;
        Candidate {
            row: 1,
            similarity: 0.8,
            record,
        }
    }

    #[tokio::test]
    async fn empty_candidates_yield_no_records_answer() {
        let synth = Synthesizer::new(Arc::new(Scripted(None)));
        let result = synth.synthesize("q", "generic", &[], &[]).await;
        assert!(result.answer.contains("No relevant records"));
    }

    #[tokio::test]
    async fn no_llm_uses_found_fallback() {
        let synth = Synthesizer::new(Arc::new(Scripted(None)));
        let c = candidate("Adopt PostgreSQL");
        let result = synth.synthesize("q", "generic", &[], &[c.clone()]).await;
        assert!(result.answer.starts_with("Found: Adopt PostgreSQL"));
        assert!(result.answer.contains(&c.record.id));
    }

    #[tokio::test]
    async fn valid_citation_passes_through() {
        let c = candidate("Adopt PostgreSQL");
        let answer = format!("We chose PostgreSQL for ACID guarantees [{}].", c.record.id);
        let synth = Synthesizer::new(Arc::new(Scripted(Some(answer.clone()))));
        let result = synth.synthesize("why postgres", "decision_rationale", &[], &[c]).await;
        assert_eq!(result.answer, answer);
    }

    #[tokio::test]
    async fn hallucinated_citation_falls_back() {
        let c = candidate("Adopt PostgreSQL");
        let synth = Synthesizer::new(Arc::new(Scripted(Some(
            "As decided in [dec_2020-01-01_decision_deadbe], we use MySQL.".into(),
        ))));
        let result = synth.synthesize("why postgres", "generic", &[], &[c]).await;
        assert!(result.answer.starts_with("Found: "));
    }

    #[tokio::test]
    async fn related_queries_from_entities_and_titles() {
        let synth = Synthesizer::new(Arc::new(Scripted(None)));
        let result = synth
            .synthesize(
                "q",
                "generic",
                &["PostgreSQL".to_string()],
                &[candidate("Adopt PostgreSQL for storage")],
            )
            .await;
        assert!(result
            .related_queries
            .iter()
            .any(|s| s.contains("PostgreSQL")));
        assert!(result.related_queries.len() <= 3);
    }
}
