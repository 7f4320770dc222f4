//! Per-variant running statistics, maintained online under the variant's lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single search request, reported by the caller after the
/// request completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Whether the request succeeded
    pub success: bool,
    /// Request latency in milliseconds
    pub response_time_ms: f64,
    /// Number of hits returned
    pub result_count: i64,
    /// Whether the user clicked a result
    pub click_through: bool,
    /// Whether the request led to a conversion
    pub conversion: bool,
    /// Explicit user rating, when collected
    pub user_rating: Option<f64>,
}

/// Running statistics for one variant.
///
/// All rates and averages are maintained as online running means over
/// `total_requests` samples: `avg_n = avg_{n-1} + (x_n - avg_{n-1}) / n`.
/// No replay of raw history is needed for the means; raw samples are kept
/// alongside for deeper offline analysis and are excluded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantMetrics {
    total_requests: u64,
    avg_response_time_ms: f64,
    avg_result_count: f64,
    success_rate: f64,
    error_rate: f64,
    zero_results_rate: f64,
    click_through_rate: f64,
    conversion_rate: f64,
    avg_user_rating: f64,
    rated_requests: u64,
    #[serde(skip)]
    response_times: Vec<f64>,
    #[serde(skip)]
    result_counts: Vec<i64>,
    last_updated: Option<DateTime<Utc>>,
}

impl VariantMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one request outcome into the running statistics.
    ///
    /// Returns the updated sample count so the caller can decide whether
    /// the analysis threshold has been crossed without re-locking.
    pub fn record(&mut self, outcome: &RequestOutcome) -> u64 {
        self.total_requests += 1;
        let n = self.total_requests;

        self.response_times.push(outcome.response_time_ms);
        self.avg_response_time_ms =
            running_mean(self.avg_response_time_ms, outcome.response_time_ms, n);

        self.result_counts.push(outcome.result_count);
        #[allow(clippy::cast_precision_loss)]
        let count = outcome.result_count as f64;
        self.avg_result_count = running_mean(self.avg_result_count, count, n);

        self.success_rate = running_mean(self.success_rate, indicator(outcome.success), n);
        self.error_rate = running_mean(self.error_rate, indicator(!outcome.success), n);
        self.zero_results_rate =
            running_mean(self.zero_results_rate, indicator(outcome.result_count == 0), n);
        self.click_through_rate =
            running_mean(self.click_through_rate, indicator(outcome.click_through), n);
        self.conversion_rate = running_mean(self.conversion_rate, indicator(outcome.conversion), n);

        if let Some(rating) = outcome.user_rating {
            self.rated_requests += 1;
            self.avg_user_rating = running_mean(self.avg_user_rating, rating, self.rated_requests);
        }

        self.last_updated = Some(Utc::now());
        n
    }

    /// Total recorded requests. Monotonic; never decremented.
    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Mean request latency in milliseconds.
    #[must_use]
    pub const fn avg_response_time_ms(&self) -> f64 {
        self.avg_response_time_ms
    }

    /// Mean number of hits per request.
    #[must_use]
    pub const fn avg_result_count(&self) -> f64 {
        self.avg_result_count
    }

    /// Fraction of requests that succeeded.
    #[must_use]
    pub const fn success_rate(&self) -> f64 {
        self.success_rate
    }

    /// Fraction of requests that failed.
    #[must_use]
    pub const fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Fraction of requests that returned zero hits.
    #[must_use]
    pub const fn zero_results_rate(&self) -> f64 {
        self.zero_results_rate
    }

    /// Fraction of requests with a click-through.
    #[must_use]
    pub const fn click_through_rate(&self) -> f64 {
        self.click_through_rate
    }

    /// Fraction of requests that converted.
    #[must_use]
    pub const fn conversion_rate(&self) -> f64 {
        self.conversion_rate
    }

    /// Mean user rating over rated requests.
    #[must_use]
    pub const fn avg_user_rating(&self) -> f64 {
        self.avg_user_rating
    }

    /// Raw latency samples, for offline analysis.
    #[must_use]
    pub fn response_times(&self) -> &[f64] {
        &self.response_times
    }

    /// Raw hit-count samples, for offline analysis.
    #[must_use]
    pub fn result_counts(&self) -> &[i64] {
        &self.result_counts
    }

    /// Timestamp of the most recent recording.
    #[must_use]
    pub const fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }
}

/// Boolean sample as a 0/1 observation for a running rate.
const fn indicator(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Online running mean: `avg_n = avg_{n-1} + (x_n - avg_{n-1}) / n`.
#[allow(clippy::cast_precision_loss)]
fn running_mean(avg: f64, x: f64, n: u64) -> f64 {
    if n <= 1 {
        x
    } else {
        avg + (x - avg) / n as f64
    }
}
