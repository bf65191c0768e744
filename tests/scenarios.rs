//! End-to-end behavior of the training loop.
//!
//! Covers the cadence, accounting and consistency guarantees:
//! - the published index always equals `sign(X · committed)`
//! - the committed projection only moves at recorded commit iterations
//! - `bits_computed == N * B * commits`
//! - reservoir size never exceeds its capacity
//! - requested checkpoints are written exactly once each

use onhash::checkpoint::MemoryCheckpointStore;
use onhash::dataset::{generate_clustered, Dataset};
use onhash::learner::{OnlineSimilarityLearner, SimilarityLearnerConfig};
use onhash::reservoir::PriorityReservoir;
use onhash::trigger::{AlwaysCommit, BitFlipTrigger, NeverCommit};
use onhash::{CheckpointStore, OnlineTrainer, Reservoir, TrainingConfig, TrainingRun};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn dataset() -> Dataset {
    generate_clustered(100, 8, 4, 0.3, 17).unwrap()
}

fn learner(bits: usize) -> OnlineSimilarityLearner {
    OnlineSimilarityLearner::new(SimilarityLearnerConfig {
        bits,
        learning_rate: 0.1,
        init_scale: 1.0,
    })
}

fn scenario_config(update_interval: usize, reservoir_size: usize) -> TrainingConfig {
    TrainingConfig::default()
        .with_epoch(1)
        .with_num_train(100)
        .with_batch_size(10)
        .with_update_interval(update_interval)
        .with_reservoir_size(reservoir_size)
        .with_seed(3)
}

#[test]
fn scenario_a_commit_every_iteration() {
    init_tracing();
    let ds = dataset();
    let mut trainer = OnlineTrainer::new(
        scenario_config(10, 0),
        learner(4),
        PriorityReservoir::new(0),
        AlwaysCommit,
    );
    let summary = trainer.run(&ds, 0, &[]).unwrap();

    assert_eq!(summary.iterations, 10);
    assert_eq!(summary.update_iters, (1..=10).collect::<Vec<_>>());
    assert_eq!(summary.ht_updates, 10);
    assert_eq!(summary.bits_computed, 4000);
}

#[test]
fn scenario_b_sparse_trigger_checks() {
    let ds = dataset();
    let mut trainer = OnlineTrainer::new(
        scenario_config(50, 0),
        learner(4),
        PriorityReservoir::new(0),
        AlwaysCommit,
    );
    let summary = trainer.run(&ds, 0, &[]).unwrap();

    assert_eq!(summary.update_iters, vec![5, 10]);
    assert_eq!(summary.bits_computed, 2 * 400);
}

#[test]
fn scenario_c_reservoir_tracks_committed_projection() {
    let ds = dataset();
    let config = scenario_config(20, 20);
    let mut learner = learner(16);
    let mut maintainer = PriorityReservoir::new(5);
    let trigger = BitFlipTrigger::new(0.02).unwrap();
    let store = MemoryCheckpointStore::new();
    let mut run = TrainingRun::init(&ds, &config, 0, &[], &mut learner).unwrap();

    let mut prev_len = 0;
    let mut prev_codes: Option<onhash::BinaryCodes> = None;
    while let Some(out) = run
        .step(&mut learner, &mut maintainer, &trigger, &store)
        .unwrap()
    {
        let Reservoir::Active(sample) = run.reservoir() else {
            panic!("reservoir should be active");
        };
        assert!(sample.len() >= prev_len);
        assert!(sample.len() <= 20);

        // codes always reflect the committed projection
        let expected = run.index().committed().encode(sample.features()).unwrap();
        assert_eq!(sample.codes(), &expected);

        // retained points only get new codes on commit iterations
        if let Some(prev) = &prev_codes {
            if !out.committed {
                for slot in (0..prev.rows()).filter(|s| !out.reservoir_changed.contains(s)) {
                    assert_eq!(prev.row_bools(slot), sample.codes().row_bools(slot));
                }
            }
        }
        if out.committed {
            assert!(run.stats().update_iters.contains(&out.iteration));
        }

        prev_len = sample.len();
        prev_codes = Some(sample.codes().clone());
    }
    assert_eq!(prev_len, 20);
}

#[test]
fn scenario_d_checkpoints_written_once_and_consistent() {
    init_tracing();
    let ds = dataset();
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut trainer = OnlineTrainer::new(
        scenario_config(20, 10),
        learner(8),
        PriorityReservoir::new(1),
        BitFlipTrigger::new(0.05).unwrap(),
    )
    .with_store(store.clone());

    let summary = trainer.run(&ds, 4, &[3, 7]).unwrap();
    assert_eq!(summary.test_iters, vec![3, 7]);
    assert_eq!(store.keys(), vec![(4, 3), (4, 7)]);

    for it in [3, 7] {
        let ckpt = store.read(4, it).unwrap().unwrap();
        assert_eq!(ckpt.iteration, it);
        assert!(ckpt.is_consistent_with(ds.features()).unwrap());
        assert!(ckpt.stats.update_iters.iter().all(|&u| u <= it));
        assert_eq!(
            ckpt.stats.bits_computed,
            ckpt.stats.update_iters.len() as u64 * 100 * 8
        );
    }
}

#[test]
fn index_consistency_and_commit_monotonicity() {
    let ds = dataset();
    let config = scenario_config(10, 15);
    let mut learner = learner(12);
    let mut maintainer = PriorityReservoir::new(2);
    let trigger = BitFlipTrigger::new(0.03).unwrap();
    let store = MemoryCheckpointStore::new();
    let mut run = TrainingRun::init(&ds, &config, 1, &[], &mut learner).unwrap();
    assert!(run.index().is_consistent_with(ds.features()).unwrap());

    let mut committed = run.index().committed().clone();
    while let Some(out) = run
        .step(&mut learner, &mut maintainer, &trigger, &store)
        .unwrap()
    {
        assert!(run.index().is_consistent_with(ds.features()).unwrap());
        if out.committed {
            assert_eq!(run.index().committed(), run.current());
        } else {
            assert_eq!(run.index().committed(), &committed);
        }
        committed = run.index().committed().clone();
    }

    let iters = &run.stats().update_iters;
    assert!(iters.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        run.stats().bits_computed,
        (100 * 12) as u64 * iters.len() as u64
    );
}

#[test]
fn never_commit_is_a_no_op() {
    let ds = dataset();
    let config = scenario_config(10, 10);
    let mut learner = learner(8);
    let mut maintainer = PriorityReservoir::new(0);
    let store = MemoryCheckpointStore::new();
    let mut run = TrainingRun::init(&ds, &config, 0, &[], &mut learner).unwrap();
    let initial = run.index().clone();

    while run
        .step(&mut learner, &mut maintainer, &NeverCommit, &store)
        .unwrap()
        .is_some()
    {
        assert_eq!(run.index(), &initial);
    }
    let summary = run.finish();
    assert!(summary.update_iters.is_empty());
    assert_eq!(summary.bits_computed, 0);
}

#[test]
fn multi_epoch_stream_length() {
    let ds = dataset();
    let config = TrainingConfig::default()
        .with_epoch(3)
        .with_num_train(40)
        .with_batch_size(7)
        .with_update_interval(14);
    let mut trainer =
        OnlineTrainer::new(config, learner(4), PriorityReservoir::new(0), AlwaysCommit);
    let summary = trainer.run(&ds, 0, &[]).unwrap();

    // 120 examples in batches of 7
    assert_eq!(summary.iterations, 18);
    assert_eq!(summary.update_iters, vec![2, 4, 6, 8, 10, 12, 14, 16, 18]);
}

#[test]
fn insufficient_rows_fail_before_any_work() {
    let ds = dataset();
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut trainer = OnlineTrainer::new(
        scenario_config(10, 0).with_num_train(101),
        learner(4),
        PriorityReservoir::new(0),
        AlwaysCommit,
    )
    .with_store(store.clone());
    assert!(matches!(
        trainer.run(&ds, 0, &[1]),
        Err(onhash::OnlineError::InsufficientTrainingRows { .. })
    ));
    assert!(store.is_empty());
}
