//! Language backend contract for feature extraction.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{EntityKind, Features};

/// Known entity passed to the backend so it can resolve surface forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHint {
    /// Display name.
    pub name: String,
    /// Referent kind.
    pub kind: EntityKind,
}

/// Errors a language backend may return. All of them are recoverable from
/// the pipeline's point of view: extraction degrades to lexical mode.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend timed out")]
    Timeout,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend returned malformed output: {0}")]
    Malformed(String),
}

/// An LLM-backed feature extractor.
///
/// Implementations live outside the engine; the engine only depends on
/// this narrow interface. Returned features may leave `novelty_tokens`
/// empty; novelty is computed engine-side against the per-user vocabulary.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Extract features from normalized memory text.
    async fn extract(
        &self,
        text: &str,
        prior_entities: &[EntityHint],
    ) -> std::result::Result<Features, BackendError>;

    /// Backend name, for logs and degradation reasons.
    fn name(&self) -> &str;
}
