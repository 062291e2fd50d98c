//! Engine-wide constants and default tunables.

/// Maximum length for memory text after normalization (10k chars).
///
/// Prevents unbounded input strings from exhausting memory during
/// serialization or storage operations.
pub const MAX_MEMORY_TEXT_LEN: usize = 10_000;

/// Maximum number of tags on a single memory.
pub const MAX_TAGS: usize = 64;

/// Default dedup window for idempotent writes (seconds).
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60;

/// Default hourly access count that promotes a memory to the hot tier.
pub const DEFAULT_HOT_THRESHOLD_PER_HOUR: u32 = 10;

/// Default hot tier TTL (1 hour, sliding).
pub const DEFAULT_HOT_TTL_SECS: u64 = 3_600;

/// Default warm tier TTL before copy-down to cold (7 days).
pub const DEFAULT_WARM_TTL_SECS: u64 = 604_800;

/// Default cold tier retention (1 year).
pub const DEFAULT_COLD_TTL_SECS: u64 = 31_536_000;

/// Default center of the context gate sigmoid.
pub const DEFAULT_GATE_THRESHOLD: f32 = 0.5;

/// Default minimum gate value below which candidates are suppressed.
pub const DEFAULT_GATE_MIN: f32 = 0.3;

/// Default minimum `acf[p]/acf[0]` ratio for a period to qualify.
pub const DEFAULT_PATTERN_MIN_CONFIDENCE: f32 = 0.3;

/// Days of access log required before patterns are reported at all.
pub const DEFAULT_PATTERN_WINDOW_INITIAL_DAYS: u32 = 21;

/// Days of access log after which a pattern is considered stable
/// (research median for habit formation).
pub const DEFAULT_PATTERN_WINDOW_STABLE_DAYS: u32 = 66;

/// Default over-fetch multiplier for vector candidate retrieval.
pub const DEFAULT_RETRIEVAL_OVERFETCH_FACTOR: usize = 5;

/// Default grace period past an open loop's due date before expiry (days).
pub const DEFAULT_LOOP_GRACE_DAYS: i64 = 7;

/// Default feature extraction budget (milliseconds).
pub const DEFAULT_FEATURE_TIMEOUT_MS: u64 = 5_000;

/// Default vector query budget (milliseconds).
pub const DEFAULT_VECTOR_TIMEOUT_MS: u64 = 2_000;

/// Default LLM generation budget (milliseconds).
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 10_000;

/// Default cooldown between care-circle notifications for the same
/// entity (4 hours).
pub const DEFAULT_NOTIFICATION_COOLDOWN_SECS: u64 = 14_400;

/// Sliding TTL of an active context frame (4 hours).
pub const CONTEXT_FRAME_TTL_SECS: u64 = 14_400;

/// Number of historical context frames retained per user.
pub const CONTEXT_FRAME_HISTORY: usize = 50;

/// Recall session TTL (5 minutes).
pub const RECALL_SESSION_TTL_SECS: u64 = 300;

/// Grace window within which a deleted memory may be restored (days).
pub const RESTORE_GRACE_DAYS: i64 = 7;

/// Retention for hourly access log bins (90 days).
pub const ACCESS_LOG_RETENTION_DAYS: i64 = 90;

/// Half-life of the recency decay used in retrieval fusion (days).
pub const RECENCY_HALF_LIFE_DAYS: f32 = 14.0;

/// Weight of semantic similarity in the retrieval fusion formula.
pub const FUSION_SEMANTIC_WEIGHT: f32 = 0.6;

/// Weight of decayed salience in the retrieval fusion formula.
pub const FUSION_SALIENCE_WEIGHT: f32 = 0.4;

/// Valence samples kept on a relationship edge for trend computation.
pub const TREND_WINDOW: usize = 10;

/// EMA smoothing factor for the rolling relationship valence mean.
pub const VALENCE_EMA_ALPHA: f32 = 0.1;

/// Candidate periods checked by the pattern detector, in hours.
pub const CANDIDATE_PERIODS_HOURS: [usize; 3] = [24, 168, 720];

/// Number of peak offsets reported per qualifying period.
pub const PATTERN_PEAKS: usize = 3;

/// TTL applied to anticipatory hot promotions (10 minutes).
pub const PREFETCH_TTL_SECS: u64 = 600;

/// Memories promoted per anticipatory prefetch.
pub const PREFETCH_TOP_N: usize = 5;

/// Hot cache capacity (entries across all users).
pub const HOT_CACHE_CAPACITY: usize = 10_000;

/// Creation salience at or above which a memory is written straight to
/// the hot tier at ingest time.
pub const HOT_SALIENCE_THRESHOLD: f32 = 75.0;

/// Bounded retry attempts for side-effect jobs.
pub const SIDE_EFFECT_RETRIES: u32 = 3;

/// Jitter factor applied to side-effect retry backoff (+/- fraction of
/// the base delay), so retries from concurrent ingests do not align.
pub const SIDE_EFFECT_JITTER_FACTOR: f64 = 0.25;

/// Jitter factor applied to maintenance worker cadences, so engines
/// started together do not sweep in lockstep.
pub const WORKER_JITTER_FACTOR: f64 = 0.1;

/// Retrieval query cache capacity.
pub const QUERY_CACHE_CAPACITY: usize = 1_024;

/// Retrieval query cache entry TTL (seconds).
pub const QUERY_CACHE_TTL_SECS: u64 = 60;

/// Current memory record schema version.
pub const SCHEMA_VERSION: u16 = 1;

/// Salience weights version written when none is configured.
pub const DEFAULT_WEIGHTS_VERSION: &str = "w1";
