use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the relevance engine.
///
/// Variants map onto the engine's error policy classes: validation and
/// semantic errors fail fast with no side effects, transient dependency
/// errors are retried then degraded or deferred, fatal dependency errors
/// mark the engine unhealthy, and integrity errors are repaired in the
/// background while reads continue to succeed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Auth error")]
    Auth,

    #[error("Capacity exceeded, retry after {retry_after_secs}s")]
    Capacity { retry_after_secs: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Language backend error: {0}")]
    Backend(String),

    #[error("Engine unhealthy, writes refused: {0}")]
    Unhealthy(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Semantic error: {0}")]
    Semantic(String),

    #[error("Memory not found: {0}")]
    NotFound(Uuid),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Validation(_) => false,
            Error::Auth => false,
            Error::Capacity { .. } => true,
            Error::Storage(_) => true,
            Error::VectorIndex(_) => true,
            Error::Backend(_) => true,
            Error::Unhealthy(_) => false,
            Error::Integrity(_) => false,
            Error::Semantic(_) => false,
            Error::NotFound(_) => false,
            Error::Timeout(_) => true,
            Error::CircuitBreakerOpen => true,
            Error::Serialization(_) => false,
            Error::Io(_) => true,
        }
    }

    /// Check if this error should mark the whole engine unhealthy.
    ///
    /// Fatal dependency failures (schema mismatch, lost write quorum) refuse
    /// further writes until an operator intervenes; everything else is
    /// retried, degraded, or surfaced per operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unhealthy(_) | Error::Integrity(_))
    }
}
