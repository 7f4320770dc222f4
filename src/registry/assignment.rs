//! Deterministic traffic assignment.
//!
//! Two stable hashes drive assignment. The eligibility hash maps the
//! request identity to `[0, 1)` and gates participation against the
//! experiment's traffic allocation. The variant hash mixes the identity
//! with the experiment ID and maps to `[0, total weight)`; a threshold
//! walk over control-then-treatments (treatments in ascending ID order)
//! picks the arm. Both hashes are seedless FxHash, so a given identity
//! lands on the same variant on every call, in every process.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::experiment::{Experiment, QueryModifications, Variant};

/// Request attributes the HTTP layer extracts for assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentRequest {
    /// Unique request ID, used as the identity of last resort
    #[serde(default)]
    pub request_id: String,
    /// Stable user ID, the preferred identity
    #[serde(default)]
    pub user_id: String,
    /// Session ID, used when no user ID is present
    #[serde(default)]
    pub session_id: String,
    /// The search query text
    #[serde(default)]
    pub query: String,
    /// The index being searched
    #[serde(default)]
    pub index: String,
    /// Additional request context (carried, not interpreted)
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl AssignmentRequest {
    /// Identity key for the eligibility hash: user, else session, else
    /// request ID.
    #[must_use]
    pub fn identity(&self) -> &str {
        if !self.user_id.is_empty() {
            &self.user_id
        } else if !self.session_id.is_empty() {
            &self.session_id
        } else {
            &self.request_id
        }
    }

    /// Identity key for the variant hash: user, else session.
    #[must_use]
    fn variant_identity(&self) -> &str {
        if self.user_id.is_empty() {
            &self.session_id
        } else {
            &self.user_id
        }
    }
}

/// The resolved (experiment, variant) pair for one request.
///
/// Ephemeral; carries handles to the resolved experiment and variant for
/// the duration of the request so recording the outcome needs no lookup.
/// The sentinel returned when no experiment applies has no handles and
/// means "unmodified behavior".
#[derive(Debug, Clone)]
pub struct Assignment {
    experiment_id: String,
    variant_id: String,
    variant_name: String,
    experiment: Option<Arc<Experiment>>,
    variant: Option<Arc<Variant>>,
}

impl Assignment {
    /// The "no experiment" sentinel.
    #[must_use]
    pub fn unassigned() -> Self {
        Self {
            experiment_id: "control".to_string(),
            variant_id: "control".to_string(),
            variant_name: "Control".to_string(),
            experiment: None,
            variant: None,
        }
    }

    pub(crate) fn new(experiment: Arc<Experiment>, variant: Arc<Variant>) -> Self {
        Self {
            experiment_id: experiment.id().to_string(),
            variant_id: variant.id().to_string(),
            variant_name: variant.name().to_string(),
            experiment: Some(experiment),
            variant: Some(variant),
        }
    }

    /// Experiment ID, or `"control"` for the sentinel.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Variant ID, or `"control"` for the sentinel.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Human-readable variant name.
    #[must_use]
    pub fn variant_name(&self) -> &str {
        &self.variant_name
    }

    /// Whether this is the "no experiment" sentinel.
    #[must_use]
    pub const fn is_unassigned(&self) -> bool {
        self.experiment.is_none()
    }

    /// The resolved experiment, absent on the sentinel.
    #[must_use]
    pub const fn experiment(&self) -> Option<&Arc<Experiment>> {
        self.experiment.as_ref()
    }

    /// The behavior modifications the caller should apply, absent on the
    /// sentinel.
    #[must_use]
    pub fn modifications(&self) -> Option<&QueryModifications> {
        self.variant.as_deref().map(Variant::modifications)
    }
}

/// Map a 64-bit hash into `[0, 1)`.
#[allow(clippy::cast_precision_loss)]
fn to_unit(hash: u64) -> f64 {
    // 2^64 as f64; the quotient only reaches 1.0 for u64::MAX, which the
    // strict threshold comparisons below never select.
    hash as f64 / u64::MAX as f64
}

/// Eligibility hash of the request identity, in `[0, 1)`.
pub(crate) fn eligibility_hash(identity: &str) -> f64 {
    let mut hasher = FxHasher::default();
    hasher.write(identity.as_bytes());
    to_unit(hasher.finish())
}

/// Whether the request participates in an experiment at all.
pub(crate) fn should_participate(request: &AssignmentRequest, traffic_allocation: f64) -> bool {
    eligibility_hash(request.identity()) < traffic_allocation
}

/// Pick a variant for a participating request: hash the identity mixed
/// with the experiment ID into `[0, total weight)` and walk cumulative
/// weight thresholds, control first, then treatments in ID order. Falls
/// back to control if accumulated floating point never crosses the
/// threshold.
pub(crate) fn assign_variant(request: &AssignmentRequest, experiment: &Experiment) -> Arc<Variant> {
    let mut hasher = FxHasher::default();
    hasher.write(request.variant_identity().as_bytes());
    hasher.write(experiment.id().as_bytes());
    let point = to_unit(hasher.finish()) * experiment.total_weight();

    let control = Arc::clone(experiment.control());
    let mut threshold = control.weight();
    if point < threshold {
        return control;
    }

    for treatment in experiment.treatments_sorted() {
        threshold += treatment.weight();
        if point < threshold {
            return treatment;
        }
    }

    control
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentConfig;

    fn user_request(user_id: &str) -> AssignmentRequest {
        AssignmentRequest {
            user_id: user_id.to_string(),
            ..AssignmentRequest::default()
        }
    }

    #[test]
    fn test_identity_prefers_user_then_session_then_request() {
        let mut request = AssignmentRequest {
            request_id: "r".to_string(),
            user_id: "u".to_string(),
            session_id: "s".to_string(),
            ..AssignmentRequest::default()
        };
        assert_eq!(request.identity(), "u");
        request.user_id.clear();
        assert_eq!(request.identity(), "s");
        request.session_id.clear();
        assert_eq!(request.identity(), "r");
    }

    #[test]
    fn test_eligibility_hash_is_stable_and_in_unit_interval() {
        let first = eligibility_hash("user-42");
        let second = eligibility_hash("user-42");
        assert_eq!(first.to_bits(), second.to_bits());
        assert!((0.0..=1.0).contains(&first));
    }

    #[test]
    fn test_unassigned_sentinel() {
        let assignment = Assignment::unassigned();
        assert_eq!(assignment.experiment_id(), "control");
        assert_eq!(assignment.variant_id(), "control");
        assert!(assignment.is_unassigned());
        assert!(assignment.modifications().is_none());
    }

    #[test]
    fn test_assign_variant_is_deterministic() {
        let experiment =
            Experiment::new("exp-1", "Test", "", ExperimentConfig::default()).unwrap();
        experiment.add_treatment(Variant::new("t1", "T1", 0.5)).unwrap();
        experiment.add_treatment(Variant::new("t2", "T2", 0.5)).unwrap();

        let request = user_request("user-7");
        let first = assign_variant(&request, &experiment);
        for _ in 0..50 {
            assert_eq!(assign_variant(&request, &experiment).id(), first.id());
        }
    }

    #[test]
    fn test_assign_variant_all_weight_on_treatment() {
        let config = ExperimentConfig {
            control_weight: Some(0.0),
            ..ExperimentConfig::default()
        };
        let experiment = Experiment::new("exp-1", "Test", "", config).unwrap();
        experiment.add_treatment(Variant::new("t1", "T1", 1.0)).unwrap();

        for i in 0..100 {
            let request = user_request(&format!("user-{i}"));
            assert_eq!(assign_variant(&request, &experiment).id(), "t1");
        }
    }

    #[test]
    fn test_assign_variant_all_weight_on_control() {
        let experiment =
            Experiment::new("exp-1", "Test", "", ExperimentConfig::default()).unwrap();
        experiment.add_treatment(Variant::new("t1", "T1", 0.0)).unwrap();

        for i in 0..100 {
            let request = user_request(&format!("user-{i}"));
            assert_eq!(assign_variant(&request, &experiment).id(), "control");
        }
    }
}
