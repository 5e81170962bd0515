//! Encrypted search fan-out and merge.
//!
//! Each planned query runs as its own task: embed, encrypted scoring on the
//! store, score decryption in the Vault. The merge is a fan-in barrier that
//! unions the per-query results, keeps the best similarity per row, and
//! orders deterministically. Transport failures abort the whole recall — no
//! partial data is returned.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;

use crate::embedding::EmbeddingProvider;
use crate::envector::VectorStore;
use crate::errors::RuneError;
use crate::record::DecisionRecord;
use crate::vault::{ScorePair, ScoreVault};

/// A merged candidate with its decrypted record.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: u32,
    pub similarity: f32,
    pub record: DecisionRecord,
}

/// Run the planned queries in parallel and merge the decrypted score sets.
///
/// Ordering: similarity descending, then row ascending — ties are broken
/// deterministically so parallelism is not observable in the output.
pub async fn fan_out(
    queries: &[String],
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    vault: Arc<dyn ScoreVault>,
    index: &str,
    topk: usize,
) -> Result<Vec<ScorePair>, RuneError> {
    let mut tasks: JoinSet<Result<Vec<ScorePair>, RuneError>> = JoinSet::new();

    for query in queries {
        let embedder = Arc::clone(&embedder);
        let store = Arc::clone(&store);
        let vault = Arc::clone(&vault);
        let index = index.to_string();
        let query = query.clone();

        tasks.spawn(async move {
            let embedding = tokio::task::spawn_blocking(move || embedder.embed(&query))
                .await
                .map_err(|e| RuneError::Internal(format!("embedding task failed: {e}")))?
                .map_err(|e| RuneError::Internal(format!("embedding failed: {e}")))?;

            let cipher = store
                .search(&index, &embedding, topk)
                .await
                .map_err(RuneError::from)?;
            let pairs = vault
                .decrypt_scores(&cipher, topk)
                .await
                .map_err(RuneError::from)?;
            Ok(pairs)
        });
    }

    let mut all: Vec<ScorePair> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let pairs = joined
            .map_err(|e| RuneError::Internal(format!("search task panicked: {e}")))??;
        all.extend(pairs);
    }

    Ok(merge(all, topk))
}

/// Union per-query results keeping the maximum similarity per row, then
/// truncate to `topk` in deterministic order.
pub fn merge(pairs: Vec<ScorePair>, topk: usize) -> Vec<ScorePair> {
    let mut best: HashMap<u32, f32> = HashMap::new();
    for pair in pairs {
        best.entry(pair.row)
            .and_modify(|sim| *sim = sim.max(pair.similarity))
            .or_insert(pair.similarity);
    }

    let mut merged: Vec<ScorePair> = best
        .into_iter()
        .map(|(row, similarity)| ScorePair { row, similarity })
        .collect();
    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.row.cmp(&b.row))
    });
    merged.truncate(topk);
    merged
}

/// Fetch and decrypt metadata for the survivors, pairing each row with its
/// parsed record. Entries that fail to decode are dropped with a warning —
/// a store/Vault transport failure, by contrast, aborts the recall.
pub async fn hydrate(
    survivors: &[ScorePair],
    store: Arc<dyn VectorStore>,
    vault: Arc<dyn ScoreVault>,
    index: &str,
) -> Result<Vec<Candidate>, RuneError> {
    if survivors.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<u32> = survivors.iter().map(|p| p.row).collect();
    let ciphers = store
        .fetch_metadata(index, &rows)
        .await
        .map_err(RuneError::from)?;
    let plaintexts = vault
        .decrypt_metadata(&ciphers)
        .await
        .map_err(RuneError::from)?;

    let mut candidates = Vec::with_capacity(survivors.len());
    for (pair, plaintext) in survivors.iter().zip(plaintexts.iter()) {
        match serde_json::from_str::<DecisionRecord>(plaintext) {
            Ok(record) => candidates.push(Candidate {
                row: pair.row,
                similarity: pair.similarity,
                record,
            }),
            Err(e) => warn!(row = pair.row, %e, "dropping undecodable record metadata"),
        }
    }
    Ok(candidates)
}

/// Mean similarity of the survivors; 0.0 for an empty set.
pub fn confidence(pairs: &[ScorePair]) -> f32 {
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.iter().map(|p| p.similarity).sum::<f32>() / pairs.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(row: u32, similarity: f32) -> ScorePair {
        ScorePair { row, similarity }
    }

    #[test]
    fn merge_keeps_max_similarity_per_row() {
        let merged = merge(
            vec![pair(7, 0.4), pair(7, 0.9), pair(3, 0.6), pair(7, 0.5)],
            10,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].row, 7);
        assert!((merged[0].similarity - 0.9).abs() < 1e-6);
        assert_eq!(merged[1].row, 3);
    }

    #[test]
    fn merge_orders_desc_then_row_asc() {
        let merged = merge(
            vec![pair(9, 0.5), pair(2, 0.5), pair(5, 0.8), pair(4, 0.5)],
            10,
        );
        let rows: Vec<u32> = merged.iter().map(|p| p.row).collect();
        assert_eq!(rows, vec![5, 2, 4, 9]);
    }

    #[test]
    fn merge_truncates_to_topk() {
        let pairs = (0..20).map(|i| pair(i, i as f32 / 20.0)).collect();
        let merged = merge(pairs, 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[0].row, 19);
    }

    #[test]
    fn confidence_is_mean_similarity() {
        assert_eq!(confidence(&[]), 0.0);
        let c = confidence(&[pair(1, 0.4), pair(2, 0.8)]);
        assert!((c - 0.6).abs() < 1e-6);
    }
}
