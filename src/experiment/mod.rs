//! Experiment schema: variants, targeting, metrics, and lifecycle.
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──┬── Variant "control" (1)
//!                  ├──< Variant treatments (N, added in draft only)
//!                  ├── ExperimentTargeting
//!                  └── ExperimentResults [derived by analysis]
//! ```
//!
//! An experiment moves through `draft → running → {paused ⇄ running} →
//! complete → archived`. Treatments may only be added while in draft;
//! weights and targeting are immutable once running, which is what lets
//! the assignment path run without taking the experiment lock.

mod metrics;
mod results;
mod targeting;
mod variant;

pub use metrics::{RequestOutcome, VariantMetrics};
pub use results::{ConfidenceInterval, ExperimentResults, ResultStatus, VariantResult};
pub use targeting::ExperimentTargeting;
pub use variant::{QueryModifications, Variant, VariantBuilder};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default fraction of eligible traffic that participates.
pub const DEFAULT_TRAFFIC_ALLOCATION: f64 = 0.1;
/// Default minimum samples per variant before analysis compares it.
pub const DEFAULT_MIN_SAMPLE_SIZE: u64 = 100;
/// Default maximum experiment duration (30 days).
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Default significance level (95% confidence).
pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;
/// Default control variant weight.
pub const DEFAULT_CONTROL_WEIGHT: f64 = 0.5;

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Being configured; treatments may still be added
    Draft,
    /// Accepting assignments and recording outcomes
    Running,
    /// Temporarily not accepting assignments; metrics retained
    Paused,
    /// Finished; metrics and results frozen
    Complete,
    /// Terminal; kept for the record only
    Archived,
}

impl ExperimentStatus {
    /// Status as its wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a new experiment.
///
/// Zero/absent fields are defaulted on creation: traffic allocation 0.1,
/// minimum sample size 100, maximum duration 30 days, significance level
/// 0.05.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Fraction of eligible traffic that participates, in `[0, 1]`
    #[serde(default)]
    pub traffic_allocation: f64,
    /// Primary metric label (carried, not interpreted)
    #[serde(default)]
    pub primary_metric: String,
    /// Secondary metric labels (carried, not interpreted)
    #[serde(default)]
    pub secondary_metrics: Vec<String>,
    /// Eligibility rules
    #[serde(default)]
    pub targeting: ExperimentTargeting,
    /// Minimum samples per variant before analysis compares it
    #[serde(default)]
    pub min_sample_size: u64,
    /// Maximum experiment duration
    #[serde(default)]
    pub max_duration: Duration,
    /// p-value threshold for declaring significance, in `(0, 1)`
    #[serde(default)]
    pub significance_level: f64,
    /// Control variant weight; defaults to 0.5 when absent
    #[serde(default)]
    pub control_weight: Option<f64>,
}

/// Mutable lifecycle fields, guarded together by one lock.
#[derive(Debug)]
struct LifecycleState {
    status: ExperimentStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// A named traffic-split test comparing control behavior against one or
/// more treatments.
///
/// Owned exclusively by the registry. Identity and configuration are
/// immutable after creation; treatment membership is mutable only in
/// draft; lifecycle state and derived results sit behind their own locks
/// so the assignment hot path never blocks on metrics or analysis.
#[derive(Debug)]
pub struct Experiment {
    id: String,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    traffic_allocation: f64,
    primary_metric: String,
    secondary_metrics: Vec<String>,
    targeting: ExperimentTargeting,
    min_sample_size: u64,
    max_duration: Duration,
    significance_level: f64,
    control: Arc<Variant>,
    treatments: RwLock<BTreeMap<String, Arc<Variant>>>,
    state: RwLock<LifecycleState>,
    results: Mutex<ExperimentResults>,
}

impl Experiment {
    /// Create a draft experiment with a control variant and no treatments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `name` is empty, `traffic_allocation`
    /// is outside `[0, 1]`, or `significance_level` is outside `(0, 1)`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        config: ExperimentConfig,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidConfig("name must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&config.traffic_allocation) {
            return Err(Error::InvalidConfig(format!(
                "traffic_allocation {} outside [0, 1]",
                config.traffic_allocation
            )));
        }
        if config.significance_level < 0.0 || config.significance_level >= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "significance_level {} outside (0, 1)",
                config.significance_level
            )));
        }

        let traffic_allocation = if config.traffic_allocation == 0.0 {
            DEFAULT_TRAFFIC_ALLOCATION
        } else {
            config.traffic_allocation
        };
        let min_sample_size = if config.min_sample_size == 0 {
            DEFAULT_MIN_SAMPLE_SIZE
        } else {
            config.min_sample_size
        };
        let max_duration = if config.max_duration.is_zero() {
            DEFAULT_MAX_DURATION
        } else {
            config.max_duration
        };
        let significance_level = if config.significance_level == 0.0 {
            DEFAULT_SIGNIFICANCE_LEVEL
        } else {
            config.significance_level
        };

        let control_weight = config.control_weight.unwrap_or(DEFAULT_CONTROL_WEIGHT);
        if control_weight < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "control_weight {control_weight} must not be negative"
            )));
        }
        let control = Variant::builder("control", "Control")
            .description("Original query behavior")
            .weight(control_weight)
            .build();

        Ok(Self {
            id: id.into(),
            name,
            description: description.into(),
            created_at: Utc::now(),
            traffic_allocation,
            primary_metric: config.primary_metric,
            secondary_metrics: config.secondary_metrics,
            targeting: config.targeting,
            min_sample_size,
            max_duration,
            significance_level,
            control: Arc::new(control),
            treatments: RwLock::new(BTreeMap::new()),
            state: RwLock::new(LifecycleState {
                status: ExperimentStatus::Draft,
                started_at: None,
                ended_at: None,
            }),
            results: Mutex::new(ExperimentResults::default()),
        })
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the experiment description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Fraction of eligible traffic that participates.
    #[must_use]
    pub const fn traffic_allocation(&self) -> f64 {
        self.traffic_allocation
    }

    /// Primary metric label.
    #[must_use]
    pub fn primary_metric(&self) -> &str {
        &self.primary_metric
    }

    /// Secondary metric labels.
    #[must_use]
    pub fn secondary_metrics(&self) -> &[String] {
        &self.secondary_metrics
    }

    /// Eligibility rules.
    #[must_use]
    pub const fn targeting(&self) -> &ExperimentTargeting {
        &self.targeting
    }

    /// Minimum samples per variant before analysis compares it.
    #[must_use]
    pub const fn min_sample_size(&self) -> u64 {
        self.min_sample_size
    }

    /// Maximum experiment duration.
    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// p-value threshold for declaring significance.
    #[must_use]
    pub const fn significance_level(&self) -> f64 {
        self.significance_level
    }

    /// The control variant.
    #[must_use]
    pub fn control(&self) -> &Arc<Variant> {
        &self.control
    }

    /// Treatment variants in ascending ID order.
    ///
    /// The stable order is what makes the weight-threshold walk in
    /// variant assignment reproducible.
    ///
    /// # Panics
    ///
    /// Panics if the treatments lock is poisoned.
    #[must_use]
    pub fn treatments_sorted(&self) -> Vec<Arc<Variant>> {
        self.treatments
            .read()
            .expect("treatments lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of treatment variants.
    ///
    /// # Panics
    ///
    /// Panics if the treatments lock is poisoned.
    #[must_use]
    pub fn treatment_count(&self) -> usize {
        self.treatments.read().expect("treatments lock poisoned").len()
    }

    /// Resolve a variant by ID (`"control"` or a treatment ID).
    ///
    /// # Panics
    ///
    /// Panics if the treatments lock is poisoned.
    #[must_use]
    pub fn variant_by_id(&self, variant_id: &str) -> Option<Arc<Variant>> {
        if variant_id == self.control.id() {
            return Some(Arc::clone(&self.control));
        }
        self.treatments
            .read()
            .expect("treatments lock poisoned")
            .get(variant_id)
            .cloned()
    }

    /// Control weight plus the sum of treatment weights.
    ///
    /// # Panics
    ///
    /// Panics if the treatments lock is poisoned.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        let treatments = self.treatments.read().expect("treatments lock poisoned");
        self.control.weight() + treatments.values().map(|v| v.weight()).sum::<f64>()
    }

    /// Current lifecycle status.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn status(&self) -> ExperimentStatus {
        self.state.read().expect("state lock poisoned").status
    }

    /// When the experiment started, if it has.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("state lock poisoned").started_at
    }

    /// When the experiment stopped, if it has.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("state lock poisoned").ended_at
    }

    /// Whether the experiment currently accepts assignments.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == ExperimentStatus::Running
    }

    /// Snapshot the derived results.
    ///
    /// # Panics
    ///
    /// Panics if the results lock is poisoned.
    #[must_use]
    pub fn results(&self) -> ExperimentResults {
        self.results.lock().expect("results lock poisoned").clone()
    }

    /// Lock the derived results for the analysis pass. Concurrent passes
    /// serialize here; recording never touches this lock.
    pub(crate) fn lock_results(&self) -> MutexGuard<'_, ExperimentResults> {
        self.results.lock().expect("results lock poisoned")
    }

    /// Register a treatment variant. Allowed only in draft.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the experiment is not in draft,
    /// `InvalidConfig` for an empty/reserved/duplicate variant ID or a
    /// negative weight.
    ///
    /// # Panics
    ///
    /// Panics if the state or treatments lock is poisoned.
    pub fn add_treatment(&self, variant: Variant) -> Result<()> {
        // Hold the state lock across the membership change so a
        // concurrent start cannot interleave with the insert.
        let state = self.state.read().expect("state lock poisoned");
        if state.status != ExperimentStatus::Draft {
            return Err(Error::InvalidState {
                id: self.id.clone(),
                operation: "be modified",
                status: state.status,
            });
        }
        if variant.id().is_empty() {
            return Err(Error::InvalidConfig("variant id must not be empty".to_string()));
        }
        if variant.id() == self.control.id() {
            return Err(Error::InvalidConfig(format!(
                "variant id {} is reserved for the control variant",
                self.control.id()
            )));
        }
        if variant.weight() < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "variant {} has negative weight {}",
                variant.id(),
                variant.weight()
            )));
        }

        let mut treatments = self.treatments.write().expect("treatments lock poisoned");
        if treatments.contains_key(variant.id()) {
            return Err(Error::InvalidConfig(format!(
                "variant {} already exists",
                variant.id()
            )));
        }
        treatments.insert(variant.id().to_string(), Arc::new(variant));
        Ok(())
    }

    /// Transition `draft → running`, stamping `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if not in draft, `NoVariants` with zero
    /// treatments, or `ZeroWeight` when all weights sum to zero.
    ///
    /// # Panics
    ///
    /// Panics if the state or treatments lock is poisoned.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write().expect("state lock poisoned");
        if state.status != ExperimentStatus::Draft {
            return Err(Error::InvalidState {
                id: self.id.clone(),
                operation: "be started",
                status: state.status,
            });
        }
        if self.treatment_count() == 0 {
            return Err(Error::NoVariants(self.id.clone()));
        }
        if self.total_weight() == 0.0 {
            return Err(Error::ZeroWeight(self.id.clone()));
        }
        state.status = ExperimentStatus::Running;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Transition `running → paused`. A paused experiment stops accepting
    /// assignments but keeps its metrics.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless currently running.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn pause(&self) -> Result<()> {
        self.transition(ExperimentStatus::Paused, "be paused", |status| {
            status == ExperimentStatus::Running
        })
    }

    /// Transition `paused → running`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless currently paused.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn resume(&self) -> Result<()> {
        self.transition(ExperimentStatus::Running, "be resumed", |status| {
            status == ExperimentStatus::Paused
        })
    }

    /// Transition `running|paused → complete`, stamping `ended_at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless currently running or paused.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.write().expect("state lock poisoned");
        if !matches!(state.status, ExperimentStatus::Running | ExperimentStatus::Paused) {
            return Err(Error::InvalidState {
                id: self.id.clone(),
                operation: "be stopped",
                status: state.status,
            });
        }
        state.status = ExperimentStatus::Complete;
        state.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Transition `complete → archived`. Archived is terminal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless currently complete.
    ///
    /// # Panics
    ///
    /// Panics if the state lock is poisoned.
    pub fn archive(&self) -> Result<()> {
        self.transition(ExperimentStatus::Archived, "be archived", |status| {
            status == ExperimentStatus::Complete
        })
    }

    /// Guarded transition: either the whole state change applies or the
    /// experiment is left untouched.
    fn transition(
        &self,
        to: ExperimentStatus,
        operation: &'static str,
        allowed_from: impl Fn(ExperimentStatus) -> bool,
    ) -> Result<()> {
        let mut state = self.state.write().expect("state lock poisoned");
        if !allowed_from(state.status) {
            return Err(Error::InvalidState {
                id: self.id.clone(),
                operation,
                status: state.status,
            });
        }
        state.status = to;
        Ok(())
    }
}
