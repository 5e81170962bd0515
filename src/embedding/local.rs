//! Local ONNX Runtime embedding provider.
//!
//! Implements [`EmbeddingProvider`] with the multilingual MiniLM sentence
//! encoder via `ort`: tokenization, inference, attention-masked mean pooling,
//! and L2 normalization.

use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// Maximum sequence length fed to the encoder. The MiniLM family degrades
/// past its training window, so longer inputs are truncated.
const MAX_SEQ_LEN: usize = 128;

/// ONNX-based local embedder for the multilingual MiniLM model.
pub struct LocalEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex which guarantees
// exclusive access during run().
unsafe impl Send for LocalEmbedder {}
unsafe impl Sync for LocalEmbedder {}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists() && tokenizer_path.exists(),
            "embedding model not found under {}. Run `rune model download` first.",
            cache_dir.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(ort::Error::<()>::from)?
            .with_intra_threads(2)
            .map_err(ort::Error::<()>::from)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(model = %model_path.display(), "embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text])?;
        Ok(results.pop().expect("batch of one"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }
        let mask = attention_mask.clone();

        let shape = vec![batch as i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape.clone(), attention_mask.into_boxed_slice()))?;
        // single sentence, no segment B
        let type_ids = vec![0i64; batch * seq_len];
        let type_tensor = Tensor::from_array((shape, type_ids.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_tensor,
        })?;

        // Output name varies by export; fall back to the first output.
        let hidden = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .unwrap_or_else(|| &outputs[0]);

        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract hidden-state tensor")?;
        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == EMBEDDING_DIM as i64,
            "unexpected hidden-state shape {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
        );
        let model_seq = dims[1] as usize;

        let mut vectors = Vec::with_capacity(batch);
        for b in 0..batch {
            let row_mask = &mask[b * seq_len..b * seq_len + model_seq.min(seq_len)];
            let row = &data[b * model_seq * EMBEDDING_DIM..(b + 1) * model_seq * EMBEDDING_DIM];
            vectors.push(mean_pool(row, row_mask, EMBEDDING_DIM));
        }

        Ok(vectors)
    }
}

/// Attention-masked mean pooling over token embeddings, then L2 normalize.
fn mean_pool(tokens: &[f32], mask: &[i64], dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dim];
    let mut count = 0.0f32;
    for (s, &m) in mask.iter().enumerate() {
        if m == 0 {
            continue;
        }
        let offset = s * dim;
        for d in 0..dim {
            sum[d] += tokens[offset + d];
        }
        count += 1.0;
    }
    if count > 0.0 {
        for v in &mut sum {
            *v /= count;
        }
    }
    l2_normalize(&mut sum);
    sum
}

/// L2-normalize in place. A zero vector stays zero.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_respects_mask() {
        // two tokens, dim 2; second token masked out
        let tokens = [1.0, 3.0, 100.0, 100.0];
        let pooled = mean_pool(&tokens, &[1, 0], 2);
        // pooled = normalize([1.0, 3.0])
        let norm = (1.0f32 + 9.0).sqrt();
        assert!((pooled[0] - 1.0 / norm).abs() < 1e-6);
        assert!((pooled[1] - 3.0 / norm).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig::default()
    }

    #[test]
    #[ignore] // Requires model files — run with: cargo test -- --ignored
    fn embed_produces_normalized_384_dims() {
        let embedder = LocalEmbedder::new(&test_config()).unwrap();
        let v = embedder.embed("Hello world").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    #[ignore]
    fn multilingual_paraphrases_are_close() {
        let embedder = LocalEmbedder::new(&test_config()).unwrap();
        let en = embedder.embed("We decided to use PostgreSQL").unwrap();
        let ja = embedder.embed("PostgreSQLを使うことに決めました").unwrap();
        let off = embedder.embed("The weather is nice today").unwrap();
        let sim_cross = super::super::dot(&en, &ja);
        let sim_off = super::super::dot(&en, &off);
        assert!(sim_cross > sim_off);
    }
}
