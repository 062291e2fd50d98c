//! # Engine Configuration
//!
//! Single configuration struct for the relevance engine. The recognized
//! options are exactly the tunables of the external contract; unknown keys
//! are rejected at deserialization time so a typo cannot silently fall back
//! to a default.

use crate::constants;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which language backend the feature extractor should call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LanguageBackendKind {
    /// The primary LLM backend.
    #[default]
    Primary,
    /// The fallback LLM backend.
    Secondary,
    /// Skip the LLM entirely and extract lexically.
    LexicalOnly,
}

/// Engine configuration.
///
/// Every field has a default; a config file only needs to name the options
/// it overrides. No other tunables are recognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Idempotent-write window: identical normalized text from the same
    /// user within this window returns the existing memory id.
    pub dedup_window_seconds: u64,
    /// Opaque version tag recorded on every salience score.
    pub salience_weights_version: String,
    /// Hourly access count that promotes a memory to the hot tier.
    pub hot_threshold_per_hour: u32,
    /// Hot tier TTL in seconds (sliding).
    pub hot_ttl_seconds: u64,
    /// Warm tier TTL in seconds before copy-down to cold.
    pub warm_ttl_seconds: u64,
    /// Cold tier retention in seconds.
    pub cold_ttl_seconds: u64,
    /// Center of the context gate sigmoid.
    pub gate_threshold: f32,
    /// Minimum gate value; candidates below it are suppressed.
    pub gate_min: f32,
    /// Minimum `acf[p]/acf[0]` for a detected period to qualify.
    pub pattern_min_confidence: f32,
    /// Days of data before patterns are reported (`initial` readiness).
    pub pattern_window_initial_days: u32,
    /// Days of data before a pattern is flagged `stable`.
    pub pattern_window_stable_days: u32,
    /// Vector candidate over-fetch multiplier (K = limit x factor).
    pub retrieval_overfetch_factor: usize,
    /// Grace period past an open loop's due date before expiry, in days.
    pub loop_grace_days: i64,
    /// Feature extraction budget in milliseconds.
    pub feature_timeout_ms: u64,
    /// Vector query budget in milliseconds.
    pub vector_timeout_ms: u64,
    /// LLM generation budget in milliseconds.
    pub llm_timeout_ms: u64,
    /// Which language backend to use for feature extraction.
    pub language_backend: LanguageBackendKind,
    /// Cooldown between care-circle notifications for one entity, seconds.
    pub notification_cooldown_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_seconds: constants::DEFAULT_DEDUP_WINDOW_SECS,
            salience_weights_version: constants::DEFAULT_WEIGHTS_VERSION.to_string(),
            hot_threshold_per_hour: constants::DEFAULT_HOT_THRESHOLD_PER_HOUR,
            hot_ttl_seconds: constants::DEFAULT_HOT_TTL_SECS,
            warm_ttl_seconds: constants::DEFAULT_WARM_TTL_SECS,
            cold_ttl_seconds: constants::DEFAULT_COLD_TTL_SECS,
            gate_threshold: constants::DEFAULT_GATE_THRESHOLD,
            gate_min: constants::DEFAULT_GATE_MIN,
            pattern_min_confidence: constants::DEFAULT_PATTERN_MIN_CONFIDENCE,
            pattern_window_initial_days: constants::DEFAULT_PATTERN_WINDOW_INITIAL_DAYS,
            pattern_window_stable_days: constants::DEFAULT_PATTERN_WINDOW_STABLE_DAYS,
            retrieval_overfetch_factor: constants::DEFAULT_RETRIEVAL_OVERFETCH_FACTOR,
            loop_grace_days: constants::DEFAULT_LOOP_GRACE_DAYS,
            feature_timeout_ms: constants::DEFAULT_FEATURE_TIMEOUT_MS,
            vector_timeout_ms: constants::DEFAULT_VECTOR_TIMEOUT_MS,
            llm_timeout_ms: constants::DEFAULT_LLM_TIMEOUT_MS,
            language_backend: LanguageBackendKind::default(),
            notification_cooldown_seconds: constants::DEFAULT_NOTIFICATION_COOLDOWN_SECS,
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML, rejecting unknown keys.
    pub fn from_toml(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::Validation(format!("bad config: {e}")))?;
        config.validated()
    }

    /// Validate ranges that serde cannot express.
    pub fn validated(self) -> Result<Self> {
        if !(0.0..=1.0).contains(&self.gate_threshold) {
            return Err(Error::Validation("gate_threshold must be in [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.gate_min) {
            return Err(Error::Validation("gate_min must be in [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.pattern_min_confidence) {
            return Err(Error::Validation(
                "pattern_min_confidence must be in [0,1]".into(),
            ));
        }
        if self.retrieval_overfetch_factor == 0 {
            return Err(Error::Validation(
                "retrieval_overfetch_factor must be >= 1".into(),
            ));
        }
        Ok(self)
    }
}
