//! # abgate: embedded A/B experimentation engine
//!
//! abgate is an in-process online-experimentation engine for search
//! services. For each request it deterministically assigns a control or
//! treatment variant of a named experiment, carries that variant's
//! behavior modifications to the caller, folds the reported outcome into
//! online per-variant statistics, and continuously recomputes whether a
//! treatment statistically outperforms control.
//!
//! ## Design
//!
//! - **Deterministic assignment**: seedless FxHash over the request
//!   identity; a fixed identity always lands on the same variant.
//! - **Lock discipline**: the registry's concurrent experiment table,
//!   a per-experiment results lock, and per-variant metrics locks are
//!   acquired outside-in; the assignment hot path takes none of the
//!   inner locks.
//! - **Detached analysis**: recording an outcome never waits on the
//!   significance test; re-analysis is debounced onto a background task
//!   (or run inline, for synchronous embeddings).
//!
//! ## Example
//!
//! ```rust
//! use abgate::{
//!     AssignmentRequest, ExperimentConfig, ExperimentRegistry, RequestOutcome, Variant,
//! };
//!
//! # fn main() -> abgate::Result<()> {
//! let registry = ExperimentRegistry::new();
//!
//! let experiment = registry.create_experiment(
//!     "fuzzy-matching",
//!     "Does fuzzy matching improve success rates?",
//!     ExperimentConfig { traffic_allocation: 1.0, ..ExperimentConfig::default() },
//! )?;
//! registry.add_treatment_variant(
//!     experiment.id(),
//!     Variant::builder("fuzzy", "Fuzzy").weight(0.5).build(),
//! )?;
//! registry.start_experiment(experiment.id())?;
//!
//! let request = AssignmentRequest {
//!     user_id: "user-42".to_string(),
//!     query: "laptop".to_string(),
//!     ..AssignmentRequest::default()
//! };
//! let assignment = registry.variant_for_request(&request);
//!
//! // ... run the (possibly modified) search, then report how it went:
//! registry.record_result(&assignment, &RequestOutcome {
//!     success: true,
//!     response_time_ms: 12.0,
//!     result_count: 31,
//!     ..RequestOutcome::default()
//! });
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod analysis;
pub mod error;
pub mod experiment;
pub mod registry;

pub use error::{Error, Result};
pub use experiment::{
    Experiment, ExperimentConfig, ExperimentResults, ExperimentStatus, ExperimentTargeting,
    QueryModifications, RequestOutcome, ResultStatus, Variant, VariantMetrics,
};
pub use registry::{
    Assignment, AssignmentRequest, ExperimentAnalytics, ExperimentRegistry, ExperimentsOverview,
    VariantAnalytics,
};
