//! Local embedding generation and the pluggable outbound provider contract.
//!
//! Two layers: [`Embedder`] is the synchronous, in-process interface used by
//! the deterministic TF-IDF fallback; [`provider::EmbeddingProvider`] is the
//! async, network-shaped contract the pipeline's Embed stage (§4.5) actually
//! calls, so a real HTTP-backed embedder never blocks the runtime.

pub mod provider;
mod tfidf;

pub use provider::{EmbeddingProvider, LlmProvider};
pub use tfidf::TfIdfEmbedder;

use crate::error::Result;

/// In-process embedding generator. `TfIdfEmbedder` is the only implementer
/// that ships without a feature flag; provider::TfIdfEmbeddingProvider wraps
/// it to satisfy the async contract the pipeline uses.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Cosine similarity between two vectors of equal length. Zero for
/// mismatched lengths, empty vectors, or either having zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basic_cases() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
