#![allow(dead_code)]

//! Shared fakes for pipeline integration tests.
//!
//! The fakes sit behind the same trait seams the production adapters
//! implement. "Ciphertext" is plain JSON wrapped in the cipher newtypes —
//! the tests exercise pipeline semantics, not cryptography. Call counters
//! let tests assert that gated paths perform no outbound calls at all.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rune::embedding::{dot, EmbeddingProvider, EMBEDDING_DIM};
use rune::envector::{MetadataCipher, ScoreCipher, VectorStore};
use rune::errors::{LlmError, StoreError, VaultError};
use rune::llm::{GenerateOptions, TextGenerator};
use rune::vault::{ScorePair, ScoreVault, VaultStatus};

/// Deterministic embedder: the same text always maps to the same unit
/// vector, and distinct texts land nearly orthogonal in 384 dimensions.
pub struct FakeEmbedder;

impl EmbeddingProvider for FakeEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for i in 0..EMBEDDING_DIM {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            // map the hash onto [-1, 1]
            v[i] = (hasher.finish() as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }
}

#[derive(Default)]
struct StoreState {
    rows: Vec<(Vec<f32>, String)>,
}

/// In-memory stand-in for enVector. Inserted vectors are searchable with
/// real cosine scoring; score sets ride through `ScoreCipher` as JSON.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    pub insert_calls: AtomicU32,
    pub search_calls: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub fail_inserts: AtomicBool,
    pub fail_searches: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a record directly, bypassing the capture pipeline.
    pub fn seed_record(&self, vector: Vec<f32>, record_json: &str) {
        self.state
            .lock()
            .unwrap()
            .rows
            .push((vector, record_json.to_string()));
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn record_json(&self, row: usize) -> String {
        self.state.lock().unwrap().rows[row].1.clone()
    }

    pub fn total_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
            + self.search_calls.load(Ordering::SeqCst)
            + self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn ensure_index(&self, _index: &str, _dim: usize) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(
        &self,
        _index: &str,
        vector: &[f32],
        record_json: &str,
    ) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::RetriesExhausted(3));
        }
        self.seed_record(vector.to_vec(), record_json);
        Ok(())
    }

    async fn search(
        &self,
        _index: &str,
        vector: &[f32],
        topk: usize,
    ) -> Result<ScoreCipher, StoreError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection refused".into()));
        }

        let state = self.state.lock().unwrap();
        let mut scored: Vec<(u32, f32)> = state
            .rows
            .iter()
            .enumerate()
            .map(|(row, (stored, _))| (row as u32, dot(vector, stored)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(topk);

        Ok(ScoreCipher(serde_json::to_string(&scored).unwrap()))
    }

    async fn fetch_metadata(
        &self,
        _index: &str,
        rows: &[u32],
    ) -> Result<Vec<MetadataCipher>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(rows
            .iter()
            .map(|&row| MetadataCipher(state.rows[row as usize].1.clone()))
            .collect())
    }
}

/// In-memory stand-in for the Vault: "decrypts" the JSON the fake store
/// produced. Failure toggles simulate transport loss and policy rejection.
#[derive(Default)]
pub struct FakeVault {
    pub decrypt_calls: AtomicU32,
    pub unavailable: AtomicBool,
    pub policy_deny: AtomicBool,
}

impl FakeVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ScoreVault for FakeVault {
    async fn decrypt_scores(
        &self,
        cipher: &ScoreCipher,
        top_k: usize,
    ) -> Result<Vec<ScorePair>, VaultError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VaultError::Unavailable("deadline exceeded".into()));
        }
        if self.policy_deny.load(Ordering::SeqCst) {
            return Err(VaultError::PolicyDenied("request exceeded top-k cap".into()));
        }

        let scored: Vec<(u32, f32)> = serde_json::from_str(&cipher.0)
            .map_err(|e| VaultError::Decode(e.to_string()))?;
        Ok(scored
            .into_iter()
            .take(top_k.min(10))
            .map(|(row, similarity)| ScorePair { row, similarity })
            .collect())
    }

    async fn decrypt_metadata(
        &self,
        ciphers: &[MetadataCipher],
    ) -> Result<Vec<String>, VaultError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VaultError::Unavailable("deadline exceeded".into()));
        }
        Ok(ciphers.iter().map(|c| c.0.clone()).collect())
    }

    async fn status(&self) -> VaultStatus {
        VaultStatus {
            reachable: !self.unavailable.load(Ordering::SeqCst),
            security_mode: "development".into(),
        }
    }
}

/// LLM fake that replays a fixed response, or is unavailable when `None`.
pub struct ScriptedLlm {
    response: Option<String>,
    pub calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn replying(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Some(response.to_string()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    fn is_available(&self) -> bool {
        self.response.is_some()
    }

    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone().ok_or(LlmError::NotAvailable)
    }
}

/// Assemble a capture pipeline over the fakes with the default thresholds.
pub fn test_scribe(
    store: Arc<FakeStore>,
    tier2: Option<Arc<ScriptedLlm>>,
    tier3: Arc<ScriptedLlm>,
) -> rune::scribe::Scribe {
    use rune::scribe::tier1::{Tier1Filter, Tier1Thresholds};
    use rune::scribe::tier2::PolicyFilter;
    use rune::scribe::tier3::Extractor;

    let tier1 = Tier1Filter::new(
        64,
        Tier1Thresholds {
            similarity: 0.35,
            duplicate: 0.95,
            auto_capture: 0.8,
        },
        rune::scribe::triggers::builtin_phrases(),
    );

    rune::scribe::Scribe::new(
        Arc::new(FakeEmbedder),
        tier1,
        tier2.map(|llm| PolicyFilter::new(llm as Arc<dyn TextGenerator>)),
        Extractor::new(tier3 as Arc<dyn TextGenerator>),
        store,
        "team-index".into(),
    )
}

/// Assemble a recall pipeline over the fakes.
pub fn test_retriever(
    store: Arc<FakeStore>,
    vault: Arc<FakeVault>,
    llm: Arc<ScriptedLlm>,
) -> rune::retriever::Retriever {
    use rune::retriever::query::QueryPlanner;
    use rune::retriever::synthesize::Synthesizer;

    rune::retriever::Retriever::new(
        Arc::new(FakeEmbedder),
        store,
        vault,
        QueryPlanner::new(llm.clone() as Arc<dyn TextGenerator>),
        Synthesizer::new(llm as Arc<dyn TextGenerator>),
        "team-index".into(),
        10,
        0.5,
    )
}

/// A serialized decision record for seeding the fake store.
pub fn record_json(id: &str, title: &str, certainty: &str) -> String {
    serde_json::json!({
        "id": id,
        "timestamp": "2026-07-01T12:00:00Z",
        "kind": "decision",
        "title": title,
        "body": format!("{title} — full context."),
        "participants": [],
        "sources": [],
        "certainty": certainty,
        "tags": [],
    })
    .to_string()
}
