//! Targeting rules restricting which requests are eligible for an experiment.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::registry::AssignmentRequest;

/// Predicate set deciding request eligibility.
///
/// Each non-empty dimension is ANDed; an empty dimension is vacuously
/// true. Query patterns use prefix semantics, index patterns exact
/// equality, and time-of-day slots match the current hour formatted as
/// two digits (`"09"` for 9 AM).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentTargeting {
    /// Query prefixes; matches when the request query starts with any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_patterns: Vec<String>,
    /// Index names; matches on exact equality to any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_patterns: Vec<String>,
    /// Two-digit hour-of-day slots, e.g. `["09", "10", "17"]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_of_day: Vec<String>,
}

impl ExperimentTargeting {
    /// Targeting with no restrictions.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Whether a request is eligible for the experiment right now.
    #[must_use]
    pub fn matches(&self, request: &AssignmentRequest) -> bool {
        self.matches_at_hour(request, Local::now().hour())
    }

    /// Eligibility at a given hour-of-day; split out so time-based rules
    /// are testable without a clock.
    #[must_use]
    pub fn matches_at_hour(&self, request: &AssignmentRequest, hour: u32) -> bool {
        if !self.query_patterns.is_empty()
            && !self
                .query_patterns
                .iter()
                .any(|pattern| request.query.starts_with(pattern.as_str()))
        {
            return false;
        }

        if !self.index_patterns.is_empty()
            && !self.index_patterns.iter().any(|pattern| request.index == *pattern)
        {
            return false;
        }

        if !self.time_of_day.is_empty() {
            let slot = format!("{hour:02}");
            if !self.time_of_day.iter().any(|s| *s == slot) {
                return false;
            }
        }

        true
    }
}
