//! Statistical analysis of experiments.
//!
//! The comparison is a deliberately simplified two-proportion test: the
//! z-score over the pooled standard error is mapped to a p-value through
//! fixed buckets (z > 1.96 → 0.01, z > 1.64 → 0.05, else 0.1) and the
//! confidence interval is a fixed ±5 points around the effect. Consumers
//! depend on these exact thresholds; do not swap in a continuous test
//! without coordinating with them.

mod scheduler;

pub(crate) use scheduler::AnalysisScheduler;

use chrono::Utc;
use tracing::{debug, info};

use crate::experiment::{
    ConfidenceInterval, Experiment, ResultStatus, VariantMetrics, VariantResult,
};

/// Recompute an experiment's derived results from its variant metrics.
///
/// Serializes with concurrent passes on the experiment's results lock.
/// Variant metrics are snapshotted before the lock is taken, so recording
/// on the request path never waits on analysis. The pass is idempotent;
/// a stale rerun recomputes the same state.
pub(crate) fn analyze(experiment: &Experiment) {
    let min = experiment.min_sample_size();
    let control_metrics = experiment.control().metrics();
    let treatments: Vec<(String, VariantMetrics)> = experiment
        .treatments_sorted()
        .iter()
        .map(|v| (v.id().to_string(), v.metrics()))
        .collect();

    let mut results = experiment.lock_results();

    if control_metrics.total_requests() < min {
        results.status = ResultStatus::InsufficientData;
        return;
    }

    let control_rate = control_metrics.success_rate();
    let mut compared = 0_usize;
    let mut best: Option<(String, f64)> = None;

    for (variant_id, metrics) in treatments {
        if metrics.total_requests() < min {
            continue;
        }

        let treatment_rate = metrics.success_rate();
        let effect = if control_rate > 0.0 {
            (treatment_rate - control_rate) / control_rate * 100.0
        } else if treatment_rate > 0.0 {
            // No baseline to improve on; report the absolute rate.
            treatment_rate * 100.0
        } else {
            // Neither arm has converted: enough data, no signal.
            0.0
        };
        compared += 1;

        let p_value = two_proportion_p_value(&control_metrics, &metrics);
        results.variant_results.insert(
            variant_id.clone(),
            VariantResult {
                variant: variant_id.clone(),
                sample_size: metrics.total_requests(),
                conversion_rate: treatment_rate,
                p_value,
                effect,
                confidence_interval: ConfidenceInterval {
                    lower: effect - 5.0,
                    upper: effect + 5.0,
                    level: 0.95,
                },
            },
        );

        let best_effect = best.as_ref().map_or(0.0, |(_, e)| *e);
        if p_value < experiment.significance_level() && effect > best_effect {
            best = Some((variant_id, effect));
        }
    }

    if compared == 0 {
        results.status = ResultStatus::InsufficientData;
        results.updated_at = Some(Utc::now());
        return;
    }

    if let Some((winner, effect)) = best {
        results.status = ResultStatus::Significant;
        results.confidence = (1.0 - experiment.significance_level()) * 100.0;
        results.winner = Some(winner.clone());
        info!(
            experiment_id = experiment.id(),
            winner = %winner,
            effect,
            "experiment analysis found a significant winner"
        );
    } else {
        results.status = ResultStatus::Inconclusive;
        results.winner = None;
        results.confidence = 0.0;
        debug!(experiment_id = experiment.id(), "experiment analysis inconclusive");
    }

    results.updated_at = Some(Utc::now());
}

/// Approximate p-value for the difference between two success rates.
///
/// Standard error is `sqrt(p_c(1-p_c)/n_c + p_t(1-p_t)/n_t)`. A zero
/// standard error with differing rates is an unbounded z-score and maps
/// to the most significant bucket.
#[allow(clippy::cast_precision_loss)]
fn two_proportion_p_value(control: &VariantMetrics, treatment: &VariantMetrics) -> f64 {
    let n_c = control.total_requests();
    let n_t = treatment.total_requests();
    if n_c == 0 || n_t == 0 {
        return 1.0;
    }

    let p_c = control.success_rate();
    let p_t = treatment.success_rate();
    let diff = (p_t - p_c).abs();
    let standard_error =
        (p_c * (1.0 - p_c) / n_c as f64 + p_t * (1.0 - p_t) / n_t as f64).sqrt();

    if standard_error == 0.0 {
        return if diff > 0.0 { 0.01 } else { 1.0 };
    }

    p_value_bucket(diff / standard_error)
}

/// Fixed z-score buckets, preserved for compatibility with consumers.
const fn p_value_bucket(z_score: f64) -> f64 {
    if z_score > 1.96 {
        0.01
    } else if z_score > 1.64 {
        0.05
    } else {
        0.1
    }
}
