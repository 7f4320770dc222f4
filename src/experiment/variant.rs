//! Variant - one arm of an experiment (control or treatment)

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{RequestOutcome, VariantMetrics};

/// Behavior modifications a variant applies to the search query.
///
/// The engine never interprets this payload; it only carries it to the
/// caller, which rewrites the outgoing query accordingly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryModifications {
    /// Query DSL type override (e.g. `multi_match`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    /// Per-field boost factors
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub boost_factors: HashMap<String, f64>,
    /// Fuzziness setting (e.g. `AUTO`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzziness: Option<String>,
    /// Minimum-should-match expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_should_match: Option<String>,
    /// Result page size override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Query timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Full custom query template, overriding everything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_query: Option<String>,
    /// Serve from cache when possible
    #[serde(default)]
    pub enable_caching: bool,
    /// Prefetch likely follow-up pages
    #[serde(default)]
    pub enable_prefetch: bool,
    /// Apply per-user personalization signals
    #[serde(default)]
    pub enable_personalization: bool,
}

/// One arm of an experiment.
///
/// A variant is owned by exactly one experiment. Its metrics are guarded
/// by the variant's own lock, so recording an outcome never contends with
/// assignment or with other variants.
#[derive(Debug)]
pub struct Variant {
    id: String,
    name: String,
    description: String,
    weight: f64,
    modifications: QueryModifications,
    metrics: Mutex<VariantMetrics>,
}

impl Variant {
    /// Create a variant with zeroed metrics.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            weight,
            modifications: QueryModifications::default(),
            metrics: Mutex::new(VariantMetrics::new()),
        }
    }

    /// Create a builder for a variant with optional fields.
    #[must_use]
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> VariantBuilder {
        VariantBuilder::new(id, name)
    }

    /// Get the variant ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the variant description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the relative traffic weight.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Get the behavior-modification payload.
    #[must_use]
    pub const fn modifications(&self) -> &QueryModifications {
        &self.modifications
    }

    /// Snapshot the current metrics.
    ///
    /// # Panics
    ///
    /// Panics if the metrics lock is poisoned.
    #[must_use]
    pub fn metrics(&self) -> VariantMetrics {
        self.metrics.lock().expect("variant metrics lock poisoned").clone()
    }

    /// Fold one outcome into this variant's metrics, under the variant lock.
    ///
    /// Returns the updated sample count.
    ///
    /// # Panics
    ///
    /// Panics if the metrics lock is poisoned.
    pub fn record_outcome(&self, outcome: &RequestOutcome) -> u64 {
        self.metrics
            .lock()
            .expect("variant metrics lock poisoned")
            .record(outcome)
    }
}

/// Builder for `Variant`.
#[derive(Debug)]
pub struct VariantBuilder {
    id: String,
    name: String,
    description: String,
    weight: f64,
    modifications: QueryModifications,
}

impl VariantBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            weight: 0.5,
            modifications: QueryModifications::default(),
        }
    }

    /// Set the human-readable description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the relative traffic weight.
    #[must_use]
    pub const fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the behavior-modification payload.
    #[must_use]
    pub fn modifications(mut self, modifications: QueryModifications) -> Self {
        self.modifications = modifications;
        self
    }

    /// Build the `Variant`.
    #[must_use]
    pub fn build(self) -> Variant {
        Variant {
            id: self.id,
            name: self.name,
            description: self.description,
            weight: self.weight,
            modifications: self.modifications,
            metrics: Mutex::new(VariantMetrics::new()),
        }
    }
}
