//! # Salience Calculator
//!
//! Maps extracted features plus ambient signals to a score in [0, 100].
//!
//! The calculator is pure: the same features, text, ambient signals, and
//! weights version always produce the same score. Re-scoring offline may
//! update a memory's `current_score` but never the recorded
//! `creation_score`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::constants::DEFAULT_WEIGHTS_VERSION;
use crate::lexicon::{self, CONSEQUENCE_MARKERS, SOCIAL_MARKERS};
use crate::types::{Features, SalienceScore};

/// Signal weights. Independently normalized signals are combined as a
/// weighted sum, scaled x100, then clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalienceWeights {
    /// |valence| boosted by emotion lexicon hits.
    pub emotional: f32,
    /// Fraction of novel tokens against the user's known vocabulary.
    pub novelty: f32,
    /// Overlap with stored interests and close contacts.
    pub personal: f32,
    /// Relationship events, conflict and vulnerability markers.
    pub social: f32,
    /// Commitments, deadlines, money and time deltas.
    pub consequential: f32,
    /// Opaque version tag recorded on every score.
    pub version: String,
}

impl Default for SalienceWeights {
    fn default() -> Self {
        Self {
            emotional: 0.30,
            novelty: 0.20,
            personal: 0.20,
            social: 0.15,
            consequential: 0.15,
            version: DEFAULT_WEIGHTS_VERSION.to_string(),
        }
    }
}

/// Ambient per-user signals the calculator folds in.
#[derive(Debug, Clone, Default)]
pub struct AmbientSignals {
    /// Size of the user's known vocabulary before this memory.
    pub vocabulary_size: usize,
    /// Stored interests and goals, lowercased.
    pub interests: HashSet<String>,
    /// Close-contact names, lowercased.
    pub close_contacts: HashSet<String>,
}

/// Pure salience calculator.
#[derive(Debug, Clone)]
pub struct SalienceCalculator {
    weights: SalienceWeights,
}

impl Default for SalienceCalculator {
    fn default() -> Self {
        Self::new(SalienceWeights::default())
    }
}

impl SalienceCalculator {
    /// Create a calculator with the given weights.
    #[must_use]
    pub fn new(weights: SalienceWeights) -> Self {
        Self { weights }
    }

    /// Create a calculator with default weights under a custom version tag.
    #[must_use]
    pub fn with_version(version: String) -> Self {
        Self::new(SalienceWeights {
            version,
            ..SalienceWeights::default()
        })
    }

    /// Version tag of the active weights.
    #[must_use]
    pub fn weights_version(&self) -> &str {
        &self.weights.version
    }

    /// Score features against ambient signals. Returns a [`SalienceScore`]
    /// with creation and current score equal.
    #[must_use]
    pub fn score(&self, features: &Features, text: &str, signals: &AmbientSignals) -> SalienceScore {
        let lower = text.to_lowercase();

        let emotional = Self::emotional_intensity(features, &lower);
        let novelty = Self::novelty_fraction(features, signals);
        let personal = Self::personal_relevance(features, signals);
        let social = Self::social_weight(features, &lower);
        let consequential = Self::consequential(features, &lower);

        let weighted = emotional * self.weights.emotional
            + novelty * self.weights.novelty
            + personal * self.weights.personal
            + social * self.weights.social
            + consequential * self.weights.consequential;
        let score = (weighted * 100.0).clamp(0.0, 100.0);

        debug!(
            emotional,
            novelty, personal, social, consequential, score, "salience computed"
        );

        SalienceScore {
            creation_score: score,
            current_score: score,
            weights_version: self.weights.version.clone(),
        }
    }

    fn emotional_intensity(features: &Features, lower: &str) -> f32 {
        let (lexicon_valence, _, hits) = lexicon::emotion_hits(lower);
        let base = features.valence.abs().max(lexicon_valence.abs());
        (base + 0.15 * hits as f32).clamp(0.0, 1.0)
    }

    fn novelty_fraction(features: &Features, signals: &AmbientSignals) -> f32 {
        if features.novelty_tokens.is_empty() {
            return 0.0;
        }
        let denominator = signals.vocabulary_size.max(1) as f32;
        (features.novelty_tokens.len() as f32 / denominator).clamp(0.0, 1.0)
    }

    fn personal_relevance(features: &Features, signals: &AmbientSignals) -> f32 {
        let topic_overlap = if features.topics.is_empty() {
            0.0
        } else {
            let matching = features
                .topics
                .iter()
                .filter(|topic| signals.interests.contains(topic.as_str()))
                .count();
            matching as f32 / features.topics.len() as f32
        };
        let contact_bonus = if features
            .people
            .iter()
            .any(|person| signals.close_contacts.contains(&person.surface.to_lowercase()))
        {
            0.5
        } else {
            0.0
        };
        (topic_overlap + contact_bonus).clamp(0.0, 1.0)
    }

    fn social_weight(features: &Features, lower: &str) -> f32 {
        let marker_score = 0.5 * lexicon::marker_hits(lower, SOCIAL_MARKERS) as f32;
        let mention_score = if features.people.is_empty() { 0.0 } else { 0.2 };
        (marker_score + mention_score).clamp(0.0, 1.0)
    }

    fn consequential(features: &Features, lower: &str) -> f32 {
        if !features.commitments.is_empty() {
            return 1.0;
        }
        (0.34 * lexicon::marker_hits(lower, CONSEQUENCE_MARKERS) as f32).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::lexical;
    use chrono::Utc;

    fn score_of(text: &str, signals: &AmbientSignals) -> f32 {
        let features = lexical::extract(text, Utc::now());
        SalienceCalculator::default()
            .score(&features, text, signals)
            .creation_score
    }

    #[test]
    fn bereavement_outscores_logistics_by_wide_margin() {
        let signals = AmbientSignals::default();
        let logistics = score_of("Meeting moved to 3pm.", &signals);
        let bereavement = score_of("Sarah's father passed away.", &signals);
        assert!(
            bereavement - logistics >= 25.0,
            "expected >= 25 point margin, got {bereavement} vs {logistics}"
        );
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let features = lexical::extract("I'll pay the deposit by Friday.", Utc::now());
        let signals = AmbientSignals {
            vocabulary_size: 100,
            ..AmbientSignals::default()
        };
        let calculator = SalienceCalculator::default();
        let a = calculator.score(&features, "I'll pay the deposit by Friday.", &signals);
        let b = calculator.score(&features, "I'll pay the deposit by Friday.", &signals);
        assert_eq!(a, b);
    }

    #[test]
    fn commitments_max_the_consequential_signal() {
        let mut features = Features::default();
        features.commitments.push(crate::types::ProposedCommitment {
            polarity: crate::types::CommitmentPolarity::YouOwe,
            counterparty: "Ana".into(),
            description: "return the ladder".into(),
            due_at: None,
        });
        let score = SalienceCalculator::default().score(
            &features,
            "return the ladder",
            &AmbientSignals::default(),
        );
        // consequential = 1.0 contributes its full 15 points.
        assert!(score.creation_score >= 15.0);
    }

    #[test]
    fn close_contact_mention_raises_personal_relevance() {
        let mut signals = AmbientSignals::default();
        let baseline = score_of("Coffee with Priya tomorrow.", &signals);
        signals.close_contacts.insert("priya".into());
        let boosted = score_of("Coffee with Priya tomorrow.", &signals);
        assert!(boosted > baseline);
    }

    #[test]
    fn score_clamped_to_range() {
        let signals = AmbientSignals {
            vocabulary_size: 1,
            ..AmbientSignals::default()
        };
        let score = score_of(
            "Devastated: father died, funeral Friday, I owe the hospital and the funeral home.",
            &signals,
        );
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn weights_version_is_recorded() {
        let calculator = SalienceCalculator::with_version("w-test".into());
        let score = calculator.score(
            &Features::default(),
            "anything",
            &AmbientSignals::default(),
        );
        assert_eq!(score.weights_version, "w-test");
    }
}
