//! # Embeddings
//!
//! Embedding provider abstraction and similarity math.
//!
//! Stored memory embeddings and query embeddings must come from the same
//! model family; the provider trait is the seam where an external model
//! service plugs in. The built-in [`HashedBagEmbedder`] is a deterministic
//! lexical embedding (hashed bag of tokens, L2-normalized) suitable for
//! tests and for `lexical_only` deployments.

use async_trait::async_trait;

use crate::error::Result;
use crate::fingerprint::{fnv1a, tokenize};
use crate::lexicon::is_stopword;

/// Source of embedding vectors for memory text and queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a piece of text.
    ///
    /// # Errors
    ///
    /// Returns error when the backing model service fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Stable identifier of the model family.
    fn model_id(&self) -> &str;
}

/// Deterministic lexical embedder: tokens are hashed into a fixed number
/// of buckets with term-frequency weights, then L2-normalized.
///
/// Same text always produces the same vector, which keeps ingest
/// idempotent and export reproducible without an external model.
pub struct HashedBagEmbedder {
    dimension: usize,
}

impl HashedBagEmbedder {
    /// Default dimensionality.
    pub const DEFAULT_DIMENSION: usize = 256;

    /// Create an embedder with the default dimension.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: Self::DEFAULT_DIMENSION,
        }
    }

    /// Create an embedder with a custom dimension.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            if is_stopword(&token) {
                continue;
            }
            let bucket = (fnv1a(token.as_bytes()) as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashedBagEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashedBagEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "hashed-bag-v1"
    }
}

/// Cosine similarity between two vectors, normalized from [-1, 1] to
/// [0, 1]. Mismatched dimensions or zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    let similarity = dot_product / (magnitude_a * magnitude_b);
    (similarity + 1.0) / 2.0
}

/// Raw cosine in [-1, 1], without the shift to [0, 1]. Used by the recall
/// session vector arithmetic where sign matters.
#[must_use]
pub fn raw_cosine(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).mul_add(2.0, -1.0)
}

/// Element-wise weighted mean of vectors. Returns a zero vector of
/// `dimension` when the input is empty or weights sum to zero.
#[must_use]
pub fn weighted_mean(vectors: &[(Vec<f32>, f32)], dimension: usize) -> Vec<f32> {
    let mut out = vec![0.0_f32; dimension];
    let total: f32 = vectors.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return out;
    }
    for (vector, weight) in vectors {
        for (slot, value) in out.iter_mut().zip(vector.iter()) {
            *slot += value * weight;
        }
    }
    for slot in &mut out {
        *slot /= total;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_identical_vector() {
        let embedder = HashedBagEmbedder::new();
        let a = embedder.embed("refactor the payments flow").await.unwrap();
        let b = embedder.embed("refactor the payments flow").await.unwrap();
        assert_eq!(a, b);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn overlapping_text_scores_higher() {
        let embedder = HashedBagEmbedder::new();
        let query = embedder.embed("payments refactor").await.unwrap();
        let related = embedder.embed("refactor the payments module").await.unwrap();
        let unrelated = embedder.embed("grandma birthday cake recipe").await.unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert!(cosine_similarity(&[], &[]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn weighted_mean_respects_weights() {
        let mean = weighted_mean(&[(vec![1.0, 0.0], 1.0), (vec![0.0, 1.0], 3.0)], 2);
        assert!((mean[0] - 0.25).abs() < 1e-6);
        assert!((mean[1] - 0.75).abs() < 1e-6);
    }
}
