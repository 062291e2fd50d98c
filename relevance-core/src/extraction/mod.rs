//! # Feature Extraction
//!
//! Turns normalized memory text into a [`Features`] record.
//!
//! The extractor prefers the configured language backend and falls back to
//! lexical-only extraction when the backend times out, errors, or its
//! circuit breaker is open. Degraded results are flagged so downstream
//! consumers can see the reduced fidelity; they are never errors.

pub mod backend;
pub mod lexical;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use backend::{BackendError, EntityHint, LanguageBackend};

use crate::config::{EngineConfig, LanguageBackendKind};
use crate::fingerprint::tokenize;
use crate::lexicon::is_stopword;
use crate::storage::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::types::Features;

/// Feature extractor: backend call with budget and breaker, lexical
/// fallback, and engine-side novelty against the per-user vocabulary.
pub struct FeatureExtractor {
    backend: Option<Arc<dyn LanguageBackend>>,
    mode: LanguageBackendKind,
    timeout: Duration,
    breaker: CircuitBreaker,
    /// Tokens previously seen per user. A projection of stored text;
    /// rebuilt lazily, lost on restart without correctness impact.
    vocabulary: RwLock<HashMap<String, HashSet<String>>>,
}

impl FeatureExtractor {
    /// Create an extractor from config and an optional backend.
    ///
    /// With no backend, or with `language_backend = lexical_only`, every
    /// extraction runs the lexical path and is not marked degraded.
    #[must_use]
    pub fn new(config: &EngineConfig, backend: Option<Arc<dyn LanguageBackend>>) -> Self {
        Self {
            backend,
            mode: config.language_backend,
            timeout: Duration::from_millis(config.feature_timeout_ms),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            vocabulary: RwLock::new(HashMap::new()),
        }
    }

    /// Extract features for `text`, resolving novelty against the user's
    /// vocabulary. Infallible: backend failures degrade to lexical.
    pub async fn extract(
        &self,
        user_id: &str,
        text: &str,
        prior_entities: &[EntityHint],
        now: DateTime<Utc>,
    ) -> Features {
        let mut features = match (&self.backend, self.mode) {
            (Some(backend), LanguageBackendKind::Primary | LanguageBackendKind::Secondary) => {
                match self.call_backend(backend.as_ref(), text, prior_entities).await {
                    Ok(features) => features,
                    Err(reason) => {
                        warn!(user_id, %reason, "language backend unavailable, using lexical extraction");
                        let mut fallback = lexical::extract(text, now);
                        fallback.degraded = true;
                        fallback
                    }
                }
            }
            _ => lexical::extract(text, now),
        };

        features.novelty_tokens = self.novelty(user_id, text);
        features
    }

    async fn call_backend(
        &self,
        backend: &dyn LanguageBackend,
        text: &str,
        prior_entities: &[EntityHint],
    ) -> Result<Features, String> {
        let outcome = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(self.timeout, backend.extract(text, prior_entities))
                    .await
                {
                    Ok(Ok(features)) => Ok(features),
                    Ok(Err(error)) => Err(crate::error::Error::Backend(error.to_string())),
                    Err(_) => Err(crate::error::Error::Timeout(format!(
                        "feature extraction exceeded {:?}",
                        self.timeout
                    ))),
                }
            })
            .await;
        match outcome {
            Ok(features) => {
                debug!(backend = backend.name(), "backend extraction ok");
                Ok(features)
            }
            Err(error) => Err(error.to_string()),
        }
    }

    /// Tokens in `text` not yet in the user's vocabulary. Inserts them, so
    /// a token is novel exactly once per user.
    fn novelty(&self, user_id: &str, text: &str) -> Vec<String> {
        let tokens: Vec<String> = tokenize(text)
            .into_iter()
            .filter(|token| token.len() > 2 && !is_stopword(token))
            .collect();

        let mut vocabulary = self.vocabulary.write();
        let known = vocabulary.entry(user_id.to_string()).or_default();
        let mut novel = Vec::new();
        for token in tokens {
            if known.insert(token.clone()) {
                novel.push(token);
            }
        }
        novel
    }

    /// Size of the user's known vocabulary, for the novelty signal.
    #[must_use]
    pub fn vocabulary_size(&self, user_id: &str) -> usize {
        self.vocabulary
            .read()
            .get(user_id)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageBackend for FailingBackend {
        async fn extract(
            &self,
            _text: &str,
            _prior: &[EntityHint],
        ) -> Result<Features, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Unavailable("no model".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl LanguageBackend for SlowBackend {
        async fn extract(
            &self,
            _text: &str,
            _prior: &[EntityHint],
        ) -> Result<Features, BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Features::default())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_lexical() {
        let config = EngineConfig::default();
        let backend = Arc::new(FailingBackend {
            calls: AtomicUsize::new(0),
        });
        let extractor = FeatureExtractor::new(&config, Some(backend.clone()));

        let features = extractor.extract("u1", "Lunch with Marco.", &[], Utc::now()).await;
        assert!(features.degraded);
        assert_eq!(features.people[0].surface, "Marco");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_timeout_degrades_to_lexical() {
        let mut config = EngineConfig::default();
        config.feature_timeout_ms = 50;
        let extractor = FeatureExtractor::new(&config, Some(Arc::new(SlowBackend)));

        let features = extractor.extract("u1", "Lunch with Marco.", &[], Utc::now()).await;
        assert!(features.degraded);
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_breaker() {
        let config = EngineConfig::default();
        let backend = Arc::new(FailingBackend {
            calls: AtomicUsize::new(0),
        });
        let extractor = FeatureExtractor::new(&config, Some(backend.clone()));

        for _ in 0..8 {
            extractor.extract("u1", "hello there", &[], Utc::now()).await;
        }
        // Breaker opens after 5 consecutive failures; later calls skip the
        // backend entirely.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn lexical_only_mode_is_not_degraded() {
        let mut config = EngineConfig::default();
        config.language_backend = LanguageBackendKind::LexicalOnly;
        let extractor = FeatureExtractor::new(&config, None);

        let features = extractor.extract("u1", "Coffee with Priya.", &[], Utc::now()).await;
        assert!(!features.degraded);
    }

    #[tokio::test]
    async fn novelty_is_once_per_user() {
        let config = EngineConfig::default();
        let extractor = FeatureExtractor::new(&config, None);

        let first = extractor.extract("u1", "quarterly budget review", &[], Utc::now()).await;
        assert!(first.novelty_tokens.contains(&"budget".to_string()));

        let second = extractor.extract("u1", "budget again", &[], Utc::now()).await;
        assert!(!second.novelty_tokens.contains(&"budget".to_string()));

        // Different user: same token is novel again.
        let other = extractor.extract("u2", "budget planning", &[], Utc::now()).await;
        assert!(other.novelty_tokens.contains(&"budget".to_string()));
    }
}
