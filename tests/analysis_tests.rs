//! Metrics recording and statistical analysis: monotonic counters, the
//! sample-size gate, and winner detection.

use abgate::{
    Assignment, AssignmentRequest, ExperimentConfig, ExperimentRegistry, RequestOutcome,
    ResultStatus, Variant,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn outcome(success: bool) -> RequestOutcome {
    RequestOutcome {
        success,
        response_time_ms: 10.0,
        result_count: 5,
        ..RequestOutcome::default()
    }
}

fn running_registry(name: &str, min_sample_size: u64) -> (ExperimentRegistry, String) {
    init_tracing();
    let registry = ExperimentRegistry::new();
    let experiment = registry
        .create_experiment(
            name,
            "",
            ExperimentConfig {
                traffic_allocation: 1.0,
                min_sample_size,
                ..ExperimentConfig::default()
            },
        )
        .unwrap();
    registry
        .add_treatment_variant(experiment.id(), Variant::new("t1", "T1", 0.5))
        .unwrap();
    let id = experiment.id().to_string();
    registry.start_experiment(&id).unwrap();
    (registry, id)
}

/// Scan synthetic identities until one hashes onto the wanted variant.
fn assignment_for_variant(
    registry: &ExperimentRegistry,
    experiment_id: &str,
    variant_id: &str,
) -> Assignment {
    for i in 0..10_000 {
        let request = AssignmentRequest {
            user_id: format!("probe-user-{i}"),
            ..AssignmentRequest::default()
        };
        let assignment = registry.variant_for_request(&request);
        if assignment.experiment_id() == experiment_id && assignment.variant_id() == variant_id {
            return assignment;
        }
    }
    panic!("no identity hashed onto variant {variant_id}");
}

#[test]
fn test_recording_on_sentinel_is_a_no_op() {
    let (registry, id) = running_registry("sentinel", 1);
    registry.record_result(&Assignment::unassigned(), &outcome(true));

    let analytics = registry.experiment_analytics(&id).unwrap();
    assert_eq!(analytics.total_requests, 0);
}

#[test]
fn test_metrics_monotonicity_and_exact_success_rate() {
    let (registry, id) = running_registry("monotone", 1_000);
    let control = assignment_for_variant(&registry, &id, "control");

    for i in 0..40 {
        registry.record_result(&control, &outcome(i % 4 != 0));
    }

    let analytics = registry.experiment_analytics(&id).unwrap();
    let control_stats = &analytics.variants["control"];
    assert_eq!(control_stats.total_requests, 40);
    assert!((control_stats.metrics.success_rate() - 0.75).abs() < 1e-9);
    assert!((control_stats.metrics.error_rate() - 0.25).abs() < 1e-9);
    assert!((control_stats.metrics.avg_response_time_ms() - 10.0).abs() < 1e-9);
}

#[test]
fn test_analysis_gated_until_both_arms_reach_min_sample_size() {
    let (registry, id) = running_registry("gating", 50);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    // Control alone reaching the threshold is not enough.
    for _ in 0..50 {
        registry.record_result(&control, &outcome(true));
    }
    assert_eq!(
        registry.experiment_results(&id).unwrap().status,
        ResultStatus::InsufficientData
    );

    // Treatment short of the threshold keeps the gate closed.
    for _ in 0..49 {
        registry.record_result(&treatment, &outcome(true));
    }
    assert_eq!(
        registry.experiment_results(&id).unwrap().status,
        ResultStatus::InsufficientData
    );

    // The 50th treatment sample opens it.
    registry.record_result(&treatment, &outcome(true));
    assert_ne!(
        registry.experiment_results(&id).unwrap().status,
        ResultStatus::InsufficientData
    );
}

#[test]
fn test_clear_winner_scenario() {
    let (registry, id) = running_registry("exp1", 2);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    registry.record_result(&control, &outcome(false));
    registry.record_result(&control, &outcome(false));
    registry.record_result(&treatment, &outcome(true));
    registry.record_result(&treatment, &outcome(true));

    let results = registry.experiment_results(&id).unwrap();
    assert_eq!(results.status, ResultStatus::Significant);
    assert_eq!(results.status.as_str(), "significant");
    assert_eq!(results.winner.as_deref(), Some("t1"));
    assert!((results.confidence - 95.0).abs() < 1e-9);
    assert!(results.updated_at.is_some());

    let t1 = &results.variant_results["t1"];
    assert_eq!(t1.sample_size, 2);
    assert!((t1.conversion_rate - 1.0).abs() < 1e-9);
    assert!(t1.p_value < 0.05);
    assert!(t1.effect > 0.0);
}

#[test]
fn test_worse_treatment_is_inconclusive_not_a_winner() {
    let (registry, id) = running_registry("worse", 10);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    for _ in 0..10 {
        registry.record_result(&control, &outcome(true));
    }
    for i in 0..10 {
        registry.record_result(&treatment, &outcome(i < 2));
    }

    let results = registry.experiment_results(&id).unwrap();
    assert_eq!(results.status, ResultStatus::Inconclusive);
    assert!(results.winner.is_none());
    let t1 = &results.variant_results["t1"];
    assert!(t1.effect < 0.0);
}

#[test]
fn test_equal_rates_are_inconclusive() {
    let (registry, id) = running_registry("equal", 10);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    for i in 0..10 {
        registry.record_result(&control, &outcome(i % 2 == 0));
        registry.record_result(&treatment, &outcome(i % 2 == 0));
    }

    let results = registry.experiment_results(&id).unwrap();
    assert_eq!(results.status, ResultStatus::Inconclusive);
    assert!(results.winner.is_none());
}

#[test]
fn test_zero_conversions_everywhere_is_inconclusive_once_sampled() {
    let (registry, id) = running_registry("no-signal", 5);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    for _ in 0..5 {
        registry.record_result(&control, &outcome(false));
        registry.record_result(&treatment, &outcome(false));
    }

    let results = registry.experiment_results(&id).unwrap();
    assert_eq!(results.status, ResultStatus::Inconclusive);
    assert!(results.winner.is_none());
    let t1 = &results.variant_results["t1"];
    assert_eq!(t1.sample_size, 5);
    assert!(t1.effect.abs() < 1e-9);
    assert!(t1.conversion_rate.abs() < 1e-9);
}

#[test]
fn test_confidence_resets_when_significance_regresses() {
    let (registry, id) = running_registry("regress", 2);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    registry.record_result(&control, &outcome(false));
    registry.record_result(&control, &outcome(false));
    registry.record_result(&treatment, &outcome(true));
    registry.record_result(&treatment, &outcome(true));

    let results = registry.experiment_results(&id).unwrap();
    assert_eq!(results.status, ResultStatus::Significant);
    assert!((results.confidence - 95.0).abs() < 1e-9);

    // Control catches up; the treatment's lead is no longer significant.
    for _ in 0..10 {
        registry.record_result(&control, &outcome(true));
    }

    let results = registry.experiment_results(&id).unwrap();
    assert_eq!(results.status, ResultStatus::Inconclusive);
    assert!(results.winner.is_none());
    assert!(results.confidence.abs() < 1e-9);
}

#[test]
fn test_variant_result_confidence_interval_is_fixed_width() {
    let (registry, id) = running_registry("ci", 2);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    registry.record_result(&control, &outcome(false));
    registry.record_result(&control, &outcome(true));
    registry.record_result(&treatment, &outcome(true));
    registry.record_result(&treatment, &outcome(true));

    let results = registry.experiment_results(&id).unwrap();
    let t1 = &results.variant_results["t1"];
    assert!((t1.confidence_interval.upper - t1.confidence_interval.lower - 10.0).abs() < 1e-9);
    assert!((t1.confidence_interval.level - 0.95).abs() < 1e-9);
    assert!((t1.confidence_interval.lower - (t1.effect - 5.0)).abs() < 1e-9);
}

#[test]
fn test_results_snapshot_is_a_defensive_copy() {
    let (registry, id) = running_registry("copy", 2);
    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");

    registry.record_result(&control, &outcome(false));
    registry.record_result(&control, &outcome(false));
    registry.record_result(&treatment, &outcome(true));
    registry.record_result(&treatment, &outcome(true));

    let mut snapshot = registry.experiment_results(&id).unwrap();
    snapshot.status = ResultStatus::InsufficientData;
    snapshot.winner = None;
    snapshot.variant_results.clear();

    let fresh = registry.experiment_results(&id).unwrap();
    assert_eq!(fresh.status, ResultStatus::Significant);
    assert_eq!(fresh.winner.as_deref(), Some("t1"));
    assert!(!fresh.variant_results.is_empty());
}

#[tokio::test]
async fn test_background_analysis_catches_up_without_blocking_recording() {
    let registry = ExperimentRegistry::with_background_analysis();
    let experiment = registry
        .create_experiment(
            "background",
            "",
            ExperimentConfig {
                traffic_allocation: 1.0,
                min_sample_size: 2,
                ..ExperimentConfig::default()
            },
        )
        .unwrap();
    registry
        .add_treatment_variant(experiment.id(), Variant::new("t1", "T1", 0.5))
        .unwrap();
    let id = experiment.id().to_string();
    registry.start_experiment(&id).unwrap();

    let control = assignment_for_variant(&registry, &id, "control");
    let treatment = assignment_for_variant(&registry, &id, "t1");
    registry.record_result(&control, &outcome(false));
    registry.record_result(&control, &outcome(false));
    registry.record_result(&treatment, &outcome(true));
    registry.record_result(&treatment, &outcome(true));

    for _ in 0..200 {
        let results = registry.experiment_results(&id).unwrap();
        if results.status == ResultStatus::Significant {
            assert_eq!(results.winner.as_deref(), Some("t1"));
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("background analysis never produced results");
}
