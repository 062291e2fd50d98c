//! Context gate: context-conditioned multiplicative suppression.
//!
//! The gate value is a soft-threshold sigmoid over the cosine similarity
//! between the active frame's aggregated embedding and the candidate's
//! embedding. Candidates below the minimum gate are suppressed outright;
//! the rest are re-ranked by `score * gate`.

use crate::embeddings::cosine_similarity;

/// Sigmoid steepness. At 8.0 the gate moves from ~0.12 to ~0.88 across
/// +/-0.25 of similarity around the threshold.
const GATE_STEEPNESS: f32 = 8.0;

/// Gate value for a similarity against the configured threshold center.
#[must_use]
pub fn gate_value(similarity: f32, threshold: f32) -> f32 {
    1.0 / (1.0 + (-GATE_STEEPNESS * (similarity - threshold)).exp())
}

/// Configured context gate.
#[derive(Debug, Clone, Copy)]
pub struct ContextGate {
    threshold: f32,
    min_gate: f32,
}

impl ContextGate {
    /// Create a gate from config values.
    #[must_use]
    pub fn new(threshold: f32, min_gate: f32) -> Self {
        Self { threshold, min_gate }
    }

    /// Gate a candidate embedding against the frame embedding.
    ///
    /// Returns `None` when the candidate is suppressed (gate below the
    /// minimum), otherwise the multiplicative gate value.
    #[must_use]
    pub fn apply(&self, frame_embedding: &[f32], candidate_embedding: &[f32]) -> Option<f32> {
        let similarity = cosine_similarity(frame_embedding, candidate_embedding);
        let alpha = gate_value(similarity, self.threshold);
        (alpha >= self.min_gate).then_some(alpha)
    }
}
