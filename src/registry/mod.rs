//! Experiment registry: ownership, lifecycle, assignment, and recording.
//!
//! The registry owns every experiment. The experiment table is a
//! lock-free concurrent map so assignment never serializes the hot path;
//! a separate insertion-order list fixes the scan order so the first
//! matching experiment is the same one on every call.

mod assignment;

pub use assignment::{Assignment, AssignmentRequest};

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::AnalysisScheduler;
use crate::error::{Error, Result};
use crate::experiment::{
    Experiment, ExperimentConfig, ExperimentResults, ExperimentStatus, RequestOutcome, Variant,
    VariantMetrics,
};

/// Per-variant slice of an experiment's analytics projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantAnalytics {
    /// Variant ID
    pub variant_id: String,
    /// Variant name
    pub name: String,
    /// Samples recorded for the variant
    pub total_requests: u64,
    /// Metrics snapshot
    pub metrics: VariantMetrics,
}

/// Read-only analytics projection of one experiment, for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAnalytics {
    /// Experiment ID
    pub experiment_id: String,
    /// Lifecycle status
    pub status: ExperimentStatus,
    /// When the experiment started, if it has
    pub started_at: Option<DateTime<Utc>>,
    /// Samples across all variants
    pub total_requests: u64,
    /// Per-variant analytics, keyed by variant ID
    pub variants: HashMap<String, VariantAnalytics>,
}

/// Registry-wide summary, for dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentsOverview {
    /// Number of experiments in any status
    pub total_experiments: usize,
    /// Number currently running
    pub running_experiments: usize,
    /// Histogram of experiments per status
    pub status_counts: HashMap<String, usize>,
}

/// Owns the experiment-ID → experiment mapping and exposes creation,
/// lifecycle, assignment, and recording operations.
///
/// Construct one instance and pass it by reference to all callers; tests
/// build isolated instances. All state lives in memory for the lifetime
/// of the process.
#[derive(Debug)]
pub struct ExperimentRegistry {
    experiments: DashMap<String, Arc<Experiment>>,
    /// Insertion order; fixes the experiment scan order for assignment.
    order: RwLock<Vec<String>>,
    scheduler: AnalysisScheduler,
}

impl ExperimentRegistry {
    /// Registry that runs analysis inline on the recording call. Needs
    /// no async runtime; suits tests and synchronous embeddings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
            order: RwLock::new(Vec::new()),
            scheduler: AnalysisScheduler::inline(),
        }
    }

    /// Registry that hands analysis to a detached background task, so
    /// recording never carries the analysis cost.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_background_analysis() -> Self {
        Self {
            experiments: DashMap::new(),
            order: RwLock::new(Vec::new()),
            scheduler: AnalysisScheduler::background(),
        }
    }

    /// Create an experiment in draft with a control variant and no
    /// treatments. Zero config fields are defaulted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `name` is empty or a config field is
    /// out of range.
    pub fn create_experiment(
        &self,
        name: &str,
        description: &str,
        config: ExperimentConfig,
    ) -> Result<Arc<Experiment>> {
        let id = self.generate_experiment_id(name);
        let experiment = Arc::new(Experiment::new(&id, name, description, config)?);

        self.experiments.insert(id.clone(), Arc::clone(&experiment));
        self.order.write().expect("order lock poisoned").push(id.clone());

        info!(
            experiment_id = %id,
            name,
            traffic_allocation = experiment.traffic_allocation(),
            "created experiment"
        );
        Ok(experiment)
    }

    /// Register a treatment variant on a draft experiment, with fresh
    /// zeroed metrics.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown experiment, `InvalidState` if
    /// it is not in draft, `InvalidConfig` for a bad variant.
    pub fn add_treatment_variant(&self, experiment_id: &str, variant: Variant) -> Result<()> {
        let experiment = self.get(experiment_id)?;
        let variant_id = variant.id().to_string();
        experiment.add_treatment(variant)?;
        info!(experiment_id, variant_id = %variant_id, "added treatment variant");
        Ok(())
    }

    /// Transition an experiment `draft → running`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `InvalidState`, `NoVariants`, or `ZeroWeight`.
    pub fn start_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = self.get(experiment_id)?;
        experiment.start()?;
        info!(
            experiment_id,
            name = experiment.name(),
            treatment_variants = experiment.treatment_count(),
            "started experiment"
        );
        Ok(())
    }

    /// Transition an experiment `running → paused`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidState`.
    pub fn pause_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = self.get(experiment_id)?;
        experiment.pause()?;
        info!(experiment_id, "paused experiment");
        Ok(())
    }

    /// Transition an experiment `paused → running`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidState`.
    pub fn resume_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = self.get(experiment_id)?;
        experiment.resume()?;
        info!(experiment_id, "resumed experiment");
        Ok(())
    }

    /// Transition an experiment `running|paused → complete`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidState`.
    pub fn stop_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = self.get(experiment_id)?;
        experiment.stop()?;
        info!(experiment_id, "stopped experiment");
        Ok(())
    }

    /// Transition an experiment `complete → archived`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidState`.
    pub fn archive_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = self.get(experiment_id)?;
        experiment.archive()?;
        info!(experiment_id, "archived experiment");
        Ok(())
    }

    /// Resolve the variant a request should use.
    ///
    /// Scans running experiments in insertion order; for the first one
    /// whose targeting matches, the eligibility hash gates participation
    /// and the variant hash picks the arm. Non-participating requests
    /// fall through to the next experiment; when none applies, the
    /// sentinel assignment means "unmodified behavior". Deterministic
    /// for a fixed configuration and identity.
    #[must_use]
    pub fn variant_for_request(&self, request: &AssignmentRequest) -> Assignment {
        let order = self.order.read().expect("order lock poisoned").clone();

        for experiment_id in order {
            let Some(experiment) = self.experiments.get(&experiment_id).map(|e| Arc::clone(e.value()))
            else {
                continue;
            };
            if !experiment.is_running() {
                continue;
            }
            if !experiment.targeting().matches(request) {
                continue;
            }
            if !assignment::should_participate(request, experiment.traffic_allocation()) {
                continue;
            }

            let variant = assignment::assign_variant(request, &experiment);
            return Assignment::new(experiment, variant);
        }

        Assignment::unassigned()
    }

    /// Record a request outcome against its assigned variant.
    ///
    /// A no-op on the "no experiment" sentinel. Takes only the variant's
    /// own lock; when the variant's sample count reaches the experiment's
    /// minimum, a re-analysis is triggered through the scheduler.
    pub fn record_result(&self, assignment: &Assignment, outcome: &RequestOutcome) {
        let Some(experiment) = assignment.experiment() else {
            return;
        };
        let Some(variant) = experiment.variant_by_id(assignment.variant_id()) else {
            return;
        };

        let total = variant.record_outcome(outcome);
        if total >= experiment.min_sample_size() {
            self.scheduler.trigger(Arc::clone(experiment));
        }
    }

    /// Snapshot an experiment's derived results.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown experiment.
    pub fn experiment_results(&self, experiment_id: &str) -> Result<ExperimentResults> {
        Ok(self.get(experiment_id)?.results())
    }

    /// Look up an experiment by ID.
    #[must_use]
    pub fn experiment(&self, experiment_id: &str) -> Option<Arc<Experiment>> {
        self.experiments.get(experiment_id).map(|e| Arc::clone(e.value()))
    }

    /// All experiments, in insertion order.
    #[must_use]
    pub fn all_experiments(&self) -> Vec<Arc<Experiment>> {
        let order = self.order.read().expect("order lock poisoned");
        order
            .iter()
            .filter_map(|id| self.experiments.get(id).map(|e| Arc::clone(e.value())))
            .collect()
    }

    /// Analytics projection of one experiment, for dashboards.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown experiment.
    pub fn experiment_analytics(&self, experiment_id: &str) -> Result<ExperimentAnalytics> {
        let experiment = self.get(experiment_id)?;

        let mut variants = HashMap::new();
        let mut total_requests = 0;

        let control = experiment.control();
        let control_metrics = control.metrics();
        total_requests += control_metrics.total_requests();
        variants.insert(
            control.id().to_string(),
            VariantAnalytics {
                variant_id: control.id().to_string(),
                name: control.name().to_string(),
                total_requests: control_metrics.total_requests(),
                metrics: control_metrics,
            },
        );

        for treatment in experiment.treatments_sorted() {
            let metrics = treatment.metrics();
            total_requests += metrics.total_requests();
            variants.insert(
                treatment.id().to_string(),
                VariantAnalytics {
                    variant_id: treatment.id().to_string(),
                    name: treatment.name().to_string(),
                    total_requests: metrics.total_requests(),
                    metrics,
                },
            );
        }

        Ok(ExperimentAnalytics {
            experiment_id: experiment.id().to_string(),
            status: experiment.status(),
            started_at: experiment.started_at(),
            total_requests,
            variants,
        })
    }

    /// Registry-wide summary, for dashboards.
    #[must_use]
    pub fn experiments_overview(&self) -> ExperimentsOverview {
        let mut overview = ExperimentsOverview {
            total_experiments: self.experiments.len(),
            ..ExperimentsOverview::default()
        };

        for entry in &self.experiments {
            let status = entry.value().status();
            *overview.status_counts.entry(status.as_str().to_string()).or_insert(0) += 1;
            if status == ExperimentStatus::Running {
                overview.running_experiments += 1;
            }
        }

        overview
    }

    fn get(&self, experiment_id: &str) -> Result<Arc<Experiment>> {
        self.experiments
            .get(experiment_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::NotFound(experiment_id.to_string()))
    }

    /// Derive an experiment ID from the name and creation instant.
    /// Collision-tolerant, not globally unique; a rare clash is salted
    /// and retried.
    fn generate_experiment_id(&self, name: &str) -> String {
        let mut salt = 0_u64;
        loop {
            let mut hasher = FxHasher::default();
            hasher.write(name.as_bytes());
            hasher.write_i64(Utc::now().timestamp_nanos_opt().unwrap_or_default());
            hasher.write_u64(salt);
            let id = format!("{:016x}", hasher.finish())[..8].to_string();
            if !self.experiments.contains_key(&id) {
                return id;
            }
            salt += 1;
        }
    }
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
