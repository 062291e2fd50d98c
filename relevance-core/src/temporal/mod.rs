//! # Temporal Patterns
//!
//! Learns per-user periodicities (daily / weekly / monthly) from the
//! hourly-binned access log and drives anticipatory prefetch into the hot
//! tier ahead of predicted peaks.

pub mod detector;
pub mod prefetch;

pub use detector::{autocorrelation, PatternDetector};
pub use prefetch::{AnticipateDecision, Prefetcher};
