//! Independent repeated trials.
//!
//! Trials share only read-only inputs (dataset, config, checkpoint store
//! handle). Each gets fresh collaborators from a factory and its own
//! trial-derived seeds. With `feature = "parallel"` trials run on the rayon
//! pool; results are always returned in trial order.

use crate::checkpoint::CheckpointStore;
use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::learner::HashLearner;
use crate::reservoir::ReservoirMaintainer;
use crate::stats::RunSummary;
use crate::trainer::OnlineTrainer;
use crate::trigger::TriggerPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Run trials `0..trials`, building collaborators for each with `factory(trial)`.
///
/// A failing trial's error is returned (the first one when run sequentially).
pub fn run_trials<F, L, M, T>(
    dataset: &Dataset,
    config: &TrainingConfig,
    trials: usize,
    checkpoint_iters: &[usize],
    store: Arc<dyn CheckpointStore>,
    factory: F,
) -> Result<Vec<RunSummary>>
where
    F: Fn(usize) -> (L, M, T) + Sync,
    L: HashLearner,
    M: ReservoirMaintainer,
    T: TriggerPolicy,
{
    let run_one = |trial: usize| -> Result<RunSummary> {
        let (learner, maintainer, trigger) = factory(trial);
        OnlineTrainer::new(config.clone(), learner, maintainer, trigger)
            .with_store(Arc::clone(&store))
            .run(dataset, trial, checkpoint_iters)
    };

    #[cfg(feature = "parallel")]
    let results = (0..trials).into_par_iter().map(run_one).collect();

    #[cfg(not(feature = "parallel"))]
    let results = (0..trials).map(run_one).collect();

    results
}

/// Means over a set of trial summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialAggregate {
    pub trials: usize,
    pub mean_ht_updates: f64,
    pub mean_bits_computed: f64,
    pub mean_time_train: f64,
    pub mean_time_update: f64,
    pub mean_time_reserv: f64,
}

impl TrialAggregate {
    pub fn from_summaries(summaries: &[RunSummary]) -> Self {
        if summaries.is_empty() {
            return Self::default();
        }
        let n = summaries.len() as f64;
        let mean = |f: &dyn Fn(&RunSummary) -> f64| summaries.iter().map(f).sum::<f64>() / n;
        Self {
            trials: summaries.len(),
            mean_ht_updates: mean(&|s| s.ht_updates as f64),
            mean_bits_computed: mean(&|s| s.bits_computed as f64),
            mean_time_train: mean(&|s| s.time_train),
            mean_time_update: mean(&|s| s.time_update),
            mean_time_reserv: mean(&|s| s.time_reserv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::dataset::generate_clustered;
    use crate::learner::OnlineSimilarityLearner;
    use crate::reservoir::PriorityReservoir;
    use crate::trainer::derive_seed;
    use crate::trigger::BitFlipTrigger;

    #[test]
    fn test_trials_are_independent_and_ordered() {
        let ds = generate_clustered(80, 6, 3, 0.2, 2).unwrap();
        let config = TrainingConfig::default()
            .with_num_train(80)
            .with_batch_size(8)
            .with_update_interval(16)
            .with_reservoir_size(12)
            .with_seed(99);
        let store = Arc::new(MemoryCheckpointStore::new());

        let summaries = run_trials(&ds, &config, 3, &[5, 10], store.clone(), |trial| {
            (
                OnlineSimilarityLearner::default(),
                PriorityReservoir::new(derive_seed(99, trial, 2)),
                BitFlipTrigger::new(0.05).unwrap(),
            )
        })
        .unwrap();

        assert_eq!(summaries.len(), 3);
        for (t, s) in summaries.iter().enumerate() {
            assert_eq!(s.trial, t);
            assert_eq!(s.iterations, 10);
            assert_eq!(s.bits_computed, 80 * 32 * s.ht_updates as u64);
        }
        assert_eq!(store.len(), 6);
        assert_eq!(store.keys()[0], (0, 5));
    }

    #[test]
    fn test_aggregate_means() {
        let mk = |updates: usize, bits: u64| RunSummary {
            trial: 0,
            method: "m".into(),
            iterations: 1,
            ht_updates: updates,
            bits_computed: bits,
            time_train: 1.0,
            time_update: 2.0,
            time_reserv: 3.0,
            update_iters: vec![],
            test_iters: vec![],
        };
        let agg = TrialAggregate::from_summaries(&[mk(2, 100), mk(4, 300)]);
        assert_eq!(agg.trials, 2);
        assert_eq!(agg.mean_ht_updates, 3.0);
        assert_eq!(agg.mean_bits_computed, 200.0);
        assert_eq!(agg.mean_time_reserv, 3.0);
        assert_eq!(TrialAggregate::from_summaries(&[]), TrialAggregate::default());
    }
}
