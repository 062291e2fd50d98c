//! FFT-based periodicity detection over the hourly access series.
//!
//! The autocorrelation of the mean-centered hourly count series is
//! computed via FFT in O(n log n); candidate periods (24, 168, 720 hours)
//! qualify when `acf[p]/acf[0]` reaches the configured confidence. Peak
//! offsets come from folding the series by the qualifying period.
//! Patterns are recomputed wholesale, never mutated in place.

use chrono::{DateTime, Utc};
use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::constants::{ACCESS_LOG_RETENTION_DAYS, CANDIDATE_PERIODS_HOURS, PATTERN_PEAKS};
use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{AccessLogEntry, PeriodicSlot, TemporalPattern};

/// Autocorrelation of a series via FFT, linear (zero-padded), at every lag.
///
/// Input is mean-centered internally. `result[0]` is the total variance
/// mass; `result[lag]/result[0]` is the normalized autocorrelation.
#[must_use]
pub fn autocorrelation(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let mean = series.iter().sum::<f64>() / n as f64;

    // Zero-pad to the next power of two at least 2n, for linear (not
    // circular) correlation.
    let padded_len = (2 * n).next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = series
        .iter()
        .map(|value| Complex::new(value - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded_len)
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(padded_len).process(&mut buffer);
    for value in &mut buffer {
        let v = *value;
        *value = v * v.conj();
    }
    planner.plan_fft_inverse(padded_len).process(&mut buffer);

    // rustfft's inverse is unnormalized; the ratio acf[lag]/acf[0] is
    // scale-invariant, but normalize anyway for readable magnitudes.
    buffer
        .iter()
        .take(n)
        .map(|value| value.re / padded_len as f64)
        .collect()
}

/// Fold the hourly series by `period` and return up to
/// [`PATTERN_PEAKS`] offsets whose mass is above the folded mean,
/// strongest first.
#[must_use]
pub fn peak_offsets(counts_by_hour: &[(i64, f64)], period: usize) -> Vec<u32> {
    let mut folded = vec![0.0_f64; period];
    for (absolute_hour, count) in counts_by_hour {
        let offset = (absolute_hour.rem_euclid(period as i64)) as usize;
        folded[offset] += count;
    }
    let mean = folded.iter().sum::<f64>() / period as f64;

    let mut offsets: Vec<(usize, f64)> = folded
        .into_iter()
        .enumerate()
        .filter(|(_, mass)| *mass > mean && *mass > 0.0)
        .collect();
    offsets.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    offsets
        .into_iter()
        .take(PATTERN_PEAKS)
        .map(|(offset, _)| offset as u32)
        .collect()
}

/// Per-user pattern detector over the access log.
pub struct PatternDetector {
    store: Arc<dyn DocumentStore>,
    min_confidence: f32,
    initial_days: u32,
    stable_days: u32,
}

impl PatternDetector {
    /// Create a detector from config.
    #[must_use]
    pub fn new(config: &EngineConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            min_confidence: config.pattern_min_confidence,
            initial_days: config.pattern_window_initial_days,
            stable_days: config.pattern_window_stable_days,
        }
    }

    /// Recompute the user's pattern from the retained access log and
    /// persist it. Returns the fresh record.
    pub async fn recompute(&self, user_id: &str, now: DateTime<Utc>) -> Result<TemporalPattern> {
        let since = now - chrono::Duration::days(ACCESS_LOG_RETENTION_DAYS);
        let entries = self.store.list_access(user_id, since).await?;
        let pattern = self.detect(user_id, &entries, now);
        self.store.put_pattern(&pattern).await?;
        info!(
            user_id,
            daily = pattern.daily.is_some(),
            weekly = pattern.weekly.is_some(),
            monthly = pattern.monthly.is_some(),
            observed_days = pattern.observed_days,
            "temporal pattern recomputed"
        );
        Ok(pattern)
    }

    /// Pure detection over a slice of log entries.
    #[must_use]
    pub fn detect(
        &self,
        user_id: &str,
        entries: &[AccessLogEntry],
        now: DateTime<Utc>,
    ) -> TemporalPattern {
        let mut pattern = TemporalPattern {
            user_id: user_id.to_string(),
            daily: None,
            weekly: None,
            monthly: None,
            initial: false,
            stable: false,
            observed_days: 0,
            computed_at: now,
        };
        if entries.is_empty() {
            return pattern;
        }

        // Bin into a contiguous hourly series between the first and last
        // observed hours.
        let hours: Vec<i64> = entries.iter().map(|e| e.at.timestamp() / 3600).collect();
        let first = *hours.iter().min().unwrap_or(&0);
        let last = *hours.iter().max().unwrap_or(&0);
        let len = (last - first + 1) as usize;
        let mut series = vec![0.0_f64; len];
        for hour in &hours {
            series[(hour - first) as usize] += 1.0;
        }

        pattern.observed_days = (len / 24) as u32;
        pattern.initial = pattern.observed_days >= self.initial_days;
        pattern.stable = pattern.observed_days >= self.stable_days;

        let acf = autocorrelation(&series);
        let Some(&acf0) = acf.first() else {
            return pattern;
        };
        if acf0 <= f64::EPSILON {
            return pattern;
        }

        let counts_by_hour: Vec<(i64, f64)> = series
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0.0)
            .map(|(index, count)| (first + index as i64, *count))
            .collect();

        for period in CANDIDATE_PERIODS_HOURS {
            // Two full cycles are required before a period is assessable.
            if len < 2 * period {
                continue;
            }
            let confidence = (acf[period] / acf0) as f32;
            debug!(user_id, period, confidence, "period candidate assessed");
            if confidence < self.min_confidence {
                continue;
            }
            let slot = PeriodicSlot {
                period_hours: period as u32,
                confidence: confidence.clamp(0.0, 1.0),
                peak_offsets: peak_offsets(&counts_by_hour, period),
            };
            match period {
                24 => pattern.daily = Some(slot),
                168 => pattern.weekly = Some(slot),
                _ => pattern.monthly = Some(slot),
            }
        }

        pattern
    }

    /// Drop access log entries past the retention TTL.
    pub async fn prune_log(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        let cutoff = now - chrono::Duration::days(ACCESS_LOG_RETENTION_DAYS);
        self.store.prune_access(user_id, cutoff).await
    }
}
