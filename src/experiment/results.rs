//! Derived statistical summary of an experiment, recomputed by analysis.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistical significance status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Not enough samples to compare variants yet
    InsufficientData,
    /// Enough samples, but no treatment beats control significantly
    Inconclusive,
    /// A treatment beats control at the configured significance level
    Significant,
}

impl ResultStatus {
    /// Status as its wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient_data",
            Self::Inconclusive => "inconclusive",
            Self::Significant => "significant",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statistical confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Confidence level, e.g. 0.95
    pub level: f64,
}

/// Per-treatment comparison against control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantResult {
    /// Variant ID
    pub variant: String,
    /// Samples recorded for the variant
    pub sample_size: u64,
    /// Variant success (conversion) rate
    pub conversion_rate: f64,
    /// Approximate p-value from the bucketed z-score mapping
    pub p_value: f64,
    /// Improvement over control, in percent
    pub effect: f64,
    /// Fixed-width interval around the effect
    pub confidence_interval: ConfidenceInterval,
}

/// Derived results for a whole experiment. Recomputed by the analysis
/// pass; never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    /// Significance status
    pub status: ResultStatus,
    /// Winning treatment variant ID, when significant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Confidence in the winner, in percent
    pub confidence: f64,
    /// Per-treatment comparisons, keyed by variant ID
    pub variant_results: HashMap<String, VariantResult>,
    /// When the analysis last ran
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ExperimentResults {
    fn default() -> Self {
        Self {
            status: ResultStatus::InsufficientData,
            winner: None,
            confidence: 0.0,
            variant_results: HashMap::new(),
            updated_at: None,
        }
    }
}
