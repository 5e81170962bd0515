//! Recall pipeline end-to-end over in-memory fakes.

mod helpers;

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use helpers::{record_json, test_retriever, FakeEmbedder, FakeStore, FakeVault, ScriptedLlm};
use rune::embedding::EmbeddingProvider;
use rune::errors::RuneError;

/// Seed the store with a record whose vector is the embedding of `text`, so
/// a recall with the same text scores similarity ~1.0.
fn seed(store: &FakeStore, id: &str, title: &str, certainty: &str, text: &str) {
    let vector = FakeEmbedder.embed(text).unwrap();
    store.seed_record(vector, &record_json(id, title, certainty));
}

#[tokio::test]
async fn happy_path_without_llm_returns_fallback_answer() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    seed(
        &store,
        "dec_2026-07-01_decision_ab12cd",
        "Adopt PostgreSQL",
        "supported",
        "We chose PostgreSQL over MongoDB for ACID guarantees and JSON support.",
    );

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    let answer = retriever
        .recall(
            "We chose PostgreSQL over MongoDB for ACID guarantees and JSON support.",
            Some(5),
        )
        .await
        .unwrap();

    assert_eq!(answer.found, 1);
    assert!(answer.answer.starts_with("Found: Adopt PostgreSQL"));
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].id, "dec_2026-07-01_decision_ab12cd");
    assert_eq!(answer.sources[0].certainty.as_str(), "supported");
    // verbatim query matches the stored embedding exactly
    assert!(answer.confidence > 0.99);
    assert!(answer.warnings.is_empty());
}

#[tokio::test]
async fn synthesized_answer_cites_input_records() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    seed(
        &store,
        "dec_2026-07-01_decision_ab12cd",
        "Adopt PostgreSQL",
        "supported",
        "Why PostgreSQL?",
    );

    let llm = ScriptedLlm::replying(
        "We chose PostgreSQL for ACID guarantees [dec_2026-07-01_decision_ab12cd].",
    );
    let retriever = test_retriever(store.clone(), vault.clone(), llm);
    let answer = retriever.recall("Why PostgreSQL?", Some(5)).await.unwrap();

    assert!(answer.answer.contains("[dec_2026-07-01_decision_ab12cd]"));
    assert_eq!(answer.found, 1);
}

#[tokio::test]
async fn sources_are_unique_and_match_found() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    for i in 0..4 {
        seed(
            &store,
            &format!("dec_2026-07-01_decision_{i:06x}"),
            &format!("Decision {i}"),
            "unknown",
            &format!("decision text number {i}"),
        );
    }

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    let answer = retriever.recall("decision text number 2", Some(3)).await.unwrap();

    assert_eq!(answer.sources.len(), answer.found);
    let ids: HashSet<&str> = answer.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids.len(), answer.sources.len(), "no duplicate source ids");
    assert!(answer.found <= 3);
}

#[tokio::test]
async fn low_similarity_emits_low_confidence_warning() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    seed(
        &store,
        "dec_2026-07-01_insight_000001",
        "Unrelated note",
        "unknown",
        "completely different topic about office plants",
    );

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    // orthogonal query: similarity ~0, still returned, flagged
    let answer = retriever.recall("why did we pick kafka", Some(5)).await.unwrap();

    assert_eq!(answer.found, 1);
    assert!(answer.warnings.contains(&"low_confidence".to_string()));
    assert!(answer.confidence < 0.5);
}

#[tokio::test]
async fn empty_store_reports_no_results() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());

    let answer = retriever.recall("anything at all", None).await.unwrap();
    assert_eq!(answer.found, 0);
    assert!(answer.sources.is_empty());
    assert!(answer.answer.contains("No relevant records"));
    assert!(answer.warnings.contains(&"no_results".to_string()));
}

#[tokio::test]
async fn topk_bounds_are_enforced() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());

    for bad in [0usize, 11, 100] {
        let err = retriever.recall("question", Some(bad)).await.unwrap_err();
        assert!(matches!(err, RuneError::BadArgument(_)), "topk={bad}");
        assert_eq!(err.kind(), "bad_argument");
    }
    // no search was issued for rejected arguments
    assert_eq!(store.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn vault_down_fails_whole_recall() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    vault.unavailable.store(true, Ordering::SeqCst);
    seed(&store, "dec_2026-07-01_decision_ab12cd", "T", "unknown", "text");

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    let err = retriever.recall("text", Some(5)).await.unwrap_err();
    assert_eq!(err.kind(), "vault_unavailable");
}

#[tokio::test]
async fn vault_policy_denial_keeps_its_kind() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    vault.policy_deny.store(true, Ordering::SeqCst);
    seed(&store, "dec_2026-07-01_decision_ab12cd", "T", "unknown", "text");

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    let err = retriever.recall("text", Some(5)).await.unwrap_err();
    assert_eq!(err.kind(), "policy_denied");
}

#[tokio::test]
async fn store_down_fails_whole_recall() {
    let store = FakeStore::new();
    store.fail_searches.store(true, Ordering::SeqCst);
    let vault = FakeVault::new();

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    let err = retriever.recall("text", Some(5)).await.unwrap_err();
    assert_eq!(err.kind(), "store_unavailable");
}

#[tokio::test]
async fn multi_query_plan_fans_out_and_merges() {
    let store = FakeStore::new();
    let vault = FakeVault::new();
    seed(
        &store,
        "dec_2026-07-01_decision_ab12cd",
        "Adopt PostgreSQL",
        "supported",
        "database choice rationale",
    );

    // The scripted LLM replays the plan for every call; the assertions here
    // cover fan-out and merge, not the synthesized answer text.
    let llm = ScriptedLlm::replying(
        r#"{"intent": "decision_rationale", "entities": ["PostgreSQL"],
            "queries": ["database choice rationale", "postgres decision"]}"#,
    );
    let retriever = test_retriever(store.clone(), vault.clone(), llm);
    let answer = retriever.recall("Why PostgreSQL?", Some(5)).await.unwrap();

    // three queries (original + two expansions) searched, one merged row
    assert_eq!(store.search_calls.load(Ordering::SeqCst), 3);
    assert_eq!(answer.found, 1);
    assert_eq!(answer.sources[0].title, "Adopt PostgreSQL");
}

#[tokio::test]
async fn capture_then_recall_round_trip() {
    use helpers::test_scribe;
    use rune::scribe::{CaptureOutcome, CaptureRequest};

    let store = FakeStore::new();
    let vault = FakeVault::new();

    let scribe = test_scribe(
        store.clone(),
        Some(ScriptedLlm::replying(r#"{"capture": true, "reason": "decision"}"#)),
        ScriptedLlm::unavailable(), // minimal record path
    );

    let text = "We decided to standardize on Rust for all new backend services.";
    let outcome = scribe
        .capture(CaptureRequest {
            text: text.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let record_id = match outcome {
        CaptureOutcome::Captured { record_id } => record_id,
        other => panic!("expected capture, got {other:?}"),
    };

    let retriever = test_retriever(store.clone(), vault.clone(), ScriptedLlm::unavailable());
    let answer = retriever.recall(text, Some(5)).await.unwrap();

    assert!(answer.found >= 1);
    assert!(answer.sources.iter().any(|s| s.id == record_id));
    // verbatim text: similarity at the top is ~1.0, well above the
    // auto-capture threshold
    assert!(answer.confidence >= 0.8);
}
