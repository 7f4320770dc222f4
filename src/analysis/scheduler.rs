//! Background dispatch of analysis passes.
//!
//! Recording an outcome must never wait on analysis, so re-analysis is
//! handed to a single worker task over a channel. A per-experiment
//! pending set debounces triggers: while a pass for an experiment is
//! queued, further triggers for it coalesce into that one pass. The
//! worker is abandoned on process shutdown; a lost pass just means the
//! next recording re-triggers it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::experiment::Experiment;

/// How recorded results trigger re-analysis.
#[derive(Debug)]
pub(crate) enum AnalysisScheduler {
    /// Run the analysis pass synchronously on the recording call.
    Inline,
    /// Hand the pass to a detached worker task.
    Background {
        queue: mpsc::UnboundedSender<Arc<Experiment>>,
        pending: Arc<DashMap<String, ()>>,
    },
}

impl AnalysisScheduler {
    /// Scheduler that analyzes inline, for callers without an async
    /// runtime and for deterministic tests.
    pub(crate) const fn inline() -> Self {
        Self::Inline
    }

    /// Scheduler backed by a detached worker task.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn background() -> Self {
        let (queue, mut receiver) = mpsc::unbounded_channel::<Arc<Experiment>>();
        let pending: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());
        let worker_pending = Arc::clone(&pending);

        tokio::spawn(async move {
            while let Some(experiment) = receiver.recv().await {
                worker_pending.remove(experiment.id());
                super::analyze(&experiment);
            }
        });

        Self::Background { queue, pending }
    }

    /// Request a re-analysis of an experiment. Fire-and-forget; never
    /// blocks the caller.
    pub(crate) fn trigger(&self, experiment: Arc<Experiment>) {
        match self {
            Self::Inline => super::analyze(&experiment),
            Self::Background { queue, pending } => {
                if pending.insert(experiment.id().to_string(), ()).is_none() {
                    debug!(experiment_id = experiment.id(), "scheduling experiment analysis");
                    // Send only fails when the worker is gone, at shutdown.
                    let _ = queue.send(experiment);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{ExperimentConfig, RequestOutcome, Variant};

    fn ready_experiment() -> Arc<Experiment> {
        let config = ExperimentConfig {
            min_sample_size: 1,
            ..ExperimentConfig::default()
        };
        let experiment = Experiment::new("exp-1", "Test", "", config).unwrap();
        experiment.add_treatment(Variant::new("t1", "T1", 0.5)).unwrap();
        experiment.start().unwrap();
        Arc::new(experiment)
    }

    fn record_one(experiment: &Experiment, variant_id: &str, success: bool) {
        let variant = experiment.variant_by_id(variant_id).unwrap();
        variant.record_outcome(&RequestOutcome {
            success,
            response_time_ms: 1.0,
            result_count: 1,
            ..RequestOutcome::default()
        });
    }

    #[test]
    fn test_inline_trigger_analyzes_immediately() {
        let experiment = ready_experiment();
        record_one(&experiment, "control", false);
        record_one(&experiment, "t1", true);

        AnalysisScheduler::inline().trigger(Arc::clone(&experiment));
        assert!(experiment.results().updated_at.is_some());
    }

    #[tokio::test]
    async fn test_background_trigger_analyzes_eventually() {
        let experiment = ready_experiment();
        record_one(&experiment, "control", false);
        record_one(&experiment, "t1", true);

        let scheduler = AnalysisScheduler::background();
        scheduler.trigger(Arc::clone(&experiment));

        for _ in 0..100 {
            if experiment.results().updated_at.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("background analysis never ran");
    }

    #[tokio::test]
    async fn test_repeated_triggers_coalesce_while_pending() {
        let experiment = ready_experiment();
        let (queue, mut receiver) = mpsc::unbounded_channel();
        let scheduler = AnalysisScheduler::Background {
            queue,
            pending: Arc::new(DashMap::new()),
        };

        scheduler.trigger(Arc::clone(&experiment));
        scheduler.trigger(Arc::clone(&experiment));
        scheduler.trigger(Arc::clone(&experiment));

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }
}
