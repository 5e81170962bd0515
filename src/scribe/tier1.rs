//! Tier 1 — similarity filter.
//!
//! A bounded, process-local exemplar cache decides in constant time (no
//! network, no LLM) whether a candidate is a near-duplicate of something
//! recently captured, plain noise, or worth passing down the cascade.
//!
//! The cache is the only mutable shared state in the capture pipeline. It is
//! guarded by a mutex; critical sections are O(N) scans over in-memory
//! vectors and never perform I/O.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::embedding::dot;
use crate::scribe::triggers;

/// Outcome of the Tier-1 check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tier1Decision {
    /// Too close to a recently seen embedding.
    Duplicate { similarity: f32 },
    /// Too far from every capture-worthy exemplar and no trigger phrase.
    Noise { max_similarity: f32 },
    /// Passes to Tier 2 / Tier 3.
    Pass {
        max_similarity: f32,
        /// Strong enough to skip the Tier-2 policy filter.
        auto_capture: bool,
        /// Passed only because a trigger phrase matched literally.
        trigger_rescued: bool,
    },
}

/// Tier-1 thresholds, copied out of config at pipeline build.
#[derive(Debug, Clone, Copy)]
pub struct Tier1Thresholds {
    pub similarity: f32,
    pub duplicate: f32,
    pub auto_capture: f32,
}

struct CacheInner {
    /// Embedded trigger phrases — capture-worthy exemplars, never evicted.
    seeds: Vec<Vec<f32>>,
    /// Recently evaluated candidate embeddings with their outcome.
    /// Bounded; least-recently-inserted entries are evicted first.
    recent: VecDeque<(Vec<f32>, bool)>,
}

/// The Tier-1 filter: exemplar cache, thresholds, and the literal trigger
/// phrases (built-in table plus any team pattern file).
pub struct Tier1Filter {
    inner: Mutex<CacheInner>,
    capacity: usize,
    thresholds: Tier1Thresholds,
    phrases: Vec<String>,
}

impl Tier1Filter {
    pub fn new(capacity: usize, thresholds: Tier1Thresholds, phrases: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                seeds: Vec::new(),
                recent: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
            thresholds,
            phrases,
        }
    }

    /// Install the seed exemplars (embedded trigger phrases).
    pub fn seed(&self, embeddings: Vec<Vec<f32>>) {
        let mut inner = self.inner.lock().expect("tier1 cache lock poisoned");
        inner.seeds = embeddings;
    }

    /// Record the outcome for a candidate that passed Tier 1, evicting the
    /// oldest entry when the bound is reached.
    pub fn observe(&self, embedding: Vec<f32>, accepted: bool) {
        let mut inner = self.inner.lock().expect("tier1 cache lock poisoned");
        if inner.recent.len() >= self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back((embedding, accepted));
    }

    /// Number of dynamic entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("tier1 cache lock poisoned").recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate a candidate. `text` is only consulted for the literal
    /// trigger-phrase rescue.
    pub fn evaluate(&self, text: &str, embedding: &[f32]) -> Tier1Decision {
        let inner = self.inner.lock().expect("tier1 cache lock poisoned");

        // Duplicate suppression against everything recently seen, accepted
        // or not — a resubmission of a just-rejected text is still a
        // resubmission.
        let mut best_recent = f32::MIN;
        for (cached, _) in &inner.recent {
            let sim = dot(embedding, cached);
            best_recent = best_recent.max(sim);
        }
        if best_recent >= self.thresholds.duplicate {
            return Tier1Decision::Duplicate {
                similarity: best_recent,
            };
        }

        // Noise suppression: the candidate must resemble some capture-worthy
        // exemplar — a seed phrase or an accepted recent capture.
        let mut max_similarity = f32::MIN;
        for seed in &inner.seeds {
            max_similarity = max_similarity.max(dot(embedding, seed));
        }
        for (cached, accepted) in &inner.recent {
            if *accepted {
                max_similarity = max_similarity.max(dot(embedding, cached));
            }
        }
        if max_similarity == f32::MIN {
            max_similarity = 0.0;
        }

        drop(inner);

        if max_similarity < self.thresholds.similarity {
            if triggers::matches_any(&self.phrases, text) {
                return Tier1Decision::Pass {
                    max_similarity,
                    auto_capture: false,
                    trigger_rescued: true,
                };
            }
            return Tier1Decision::Noise { max_similarity };
        }

        Tier1Decision::Pass {
            max_similarity,
            auto_capture: max_similarity >= self.thresholds.auto_capture,
            trigger_rescued: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Tier1Thresholds {
        Tier1Thresholds {
            similarity: 0.35,
            duplicate: 0.95,
            auto_capture: 0.8,
        }
    }

    fn filter(capacity: usize) -> Tier1Filter {
        Tier1Filter::new(capacity, thresholds(), triggers::builtin_phrases())
    }

    fn unit(dim_hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        v[dim_hot] = 1.0;
        v
    }

    /// A vector with cosine similarity `sim` to `unit(dim_hot)`.
    fn leaning(dim_hot: usize, other: usize, sim: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        v[dim_hot] = sim;
        v[other] = (1.0 - sim * sim).sqrt();
        v
    }

    #[test]
    fn noise_without_seeds_or_triggers() {
        let filter = filter(8);
        let decision = filter.evaluate("random chatter about lunch", &unit(0));
        assert!(matches!(decision, Tier1Decision::Noise { .. }));
    }

    #[test]
    fn seed_similarity_passes() {
        let filter = filter(8);
        filter.seed(vec![unit(0)]);
        let decision = filter.evaluate("some candidate", &leaning(0, 1, 0.5));
        match decision {
            Tier1Decision::Pass {
                max_similarity,
                auto_capture,
                trigger_rescued,
            } => {
                assert!((max_similarity - 0.5).abs() < 1e-4);
                assert!(!auto_capture);
                assert!(!trigger_rescued);
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn strong_match_auto_captures() {
        let filter = filter(8);
        filter.seed(vec![unit(0)]);
        let decision = filter.evaluate("candidate", &leaning(0, 1, 0.85));
        assert!(matches!(
            decision,
            Tier1Decision::Pass {
                auto_capture: true,
                ..
            }
        ));
    }

    #[test]
    fn near_duplicate_of_recent_capture_is_dropped() {
        let filter = filter(8);
        filter.seed(vec![unit(0)]);
        filter.observe(unit(0), true);
        let decision = filter.evaluate("same text again", &leaning(0, 1, 0.97));
        assert!(matches!(decision, Tier1Decision::Duplicate { .. }));
    }

    #[test]
    fn rejected_entries_count_for_duplicates_not_for_noise() {
        let filter = filter(8);
        // a rejected candidate sits in the cache
        filter.observe(unit(3), false);

        // exact resubmission: duplicate
        assert!(matches!(
            filter.evaluate("again", &unit(3)),
            Tier1Decision::Duplicate { .. }
        ));

        // moderately similar to only the rejected entry: still noise,
        // because rejected entries are not capture-worthy exemplars
        assert!(matches!(
            filter.evaluate("adjacent chatter", &leaning(3, 4, 0.5)),
            Tier1Decision::Noise { .. }
        ));
    }

    #[test]
    fn trigger_phrase_rescues_low_similarity() {
        let filter = filter(8);
        let decision = filter.evaluate("we decided to adopt trunk-based development", &unit(2));
        assert!(matches!(
            decision,
            Tier1Decision::Pass {
                trigger_rescued: true,
                ..
            }
        ));
    }

    #[test]
    fn cache_never_exceeds_bound() {
        let filter = filter(4);
        for i in 0..16 {
            filter.observe(unit(i % 16), true);
            assert!(filter.len() <= 4);
        }
        assert_eq!(filter.len(), 4);
    }

    #[test]
    fn eviction_is_least_recently_inserted() {
        let filter = filter(2);
        filter.observe(unit(0), true);
        filter.observe(unit(1), true);
        filter.observe(unit(2), true); // evicts unit(0)

        // unit(0) no longer duplicates
        assert!(!matches!(
            filter.evaluate("x", &unit(0)),
            Tier1Decision::Duplicate { .. }
        ));
        // unit(2) still does
        assert!(matches!(
            filter.evaluate("x", &unit(2)),
            Tier1Decision::Duplicate { .. }
        ));
    }
}
