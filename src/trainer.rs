//! The online training loop.
//!
//! # The Problem
//!
//! The hash function improves with every batch, but the published hash
//! table only reflects the projection it was computed from. Rebuilding the
//! table costs O(N · D · B); doing it every batch wastes most of that work,
//! never doing it serves stale codes.
//!
//! # Architecture
//!
//! ```text
//! schedule batch
//!     │
//!     ▼
//! ┌───────────────┐  current W
//! │  HashLearner  │──────────────┐
//! └───────┬───────┘              │
//!         ▼                      ▼
//! ┌───────────────┐    ┌──────────────────┐
//! │   Reservoir   │───▶│  TriggerPolicy   │ (every update_interval examples)
//! │ (codes @ W_s) │    │ H_res vs H_res'  │
//! └───────────────┘    └────────┬─────────┘
//!                               ▼ commit?
//!                      ┌──────────────────┐
//!                      │ PublishedIndex   │  H = sign(X · W_s), W_s := W
//!                      └────────┬─────────┘
//!                               ▼ requested iterations
//!                      ┌──────────────────┐
//!                      │ CheckpointStore  │
//!                      └──────────────────┘
//! ```
//!
//! Each iteration runs learn → maintain reservoir → check trigger → commit →
//! checkpoint, strictly in that order. The projection and reservoir are
//! passed by value to their collaborators and replaced with what comes back.
//!
//! # Example
//!
//! ```rust
//! use onhash::{
//!     dataset::generate_clustered, learner::OnlineSimilarityLearner,
//!     reservoir::PriorityReservoir, trigger::MutualInfoTrigger,
//!     OnlineTrainer, TrainingConfig,
//! };
//!
//! let data = generate_clustered(200, 16, 4, 0.2, 7)?;
//! let config = TrainingConfig::default()
//!     .with_num_train(200)
//!     .with_batch_size(10)
//!     .with_update_interval(50)
//!     .with_reservoir_size(40);
//!
//! let mut trainer = OnlineTrainer::new(
//!     config,
//!     OnlineSimilarityLearner::default(),
//!     PriorityReservoir::new(1),
//!     MutualInfoTrigger::new(0.0),
//! );
//! let summary = trainer.run(&data, 0, &[10, 20])?;
//! assert_eq!(summary.iterations, 20);
//! # Ok::<(), onhash::OnlineError>(())
//! ```

use crate::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use crate::codes::BinaryCodes;
use crate::config::TrainingConfig;
use crate::dataset::{Dataset, Labels};
use crate::error::Result;
use crate::index::PublishedIndex;
use crate::learner::HashLearner;
use crate::projection::Projection;
use crate::reservoir::{Reservoir, ReservoirMaintainer};
use crate::schedule::TrainingSchedule;
use crate::stats::{CostStats, RunSummary};
use crate::trigger::{TriggerContext, TriggerPolicy};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

/// Seed for one random stream of one trial.
///
/// SplitMix64 over `(base, trial, stream)`, so trials and streams get
/// decorrelated seeds from a single configured base seed.
pub fn derive_seed(base: u64, trial: usize, stream: u64) -> u64 {
    let mut z = base
        .wrapping_add((trial as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(stream.wrapping_mul(0xD1B5_4A32_D192_ED03));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

const SCHEDULE_STREAM: u64 = 0;
const LEARNER_STREAM: u64 = 1;

/// Label for logs and summaries: the configured method id, else the
/// learner's own name.
fn method_name<L: HashLearner + ?Sized>(config: &TrainingConfig, learner: &L) -> String {
    if config.method_id.is_empty() {
        learner.name().to_string()
    } else {
        config.method_id.clone()
    }
}

/// What happened in one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub iteration: usize,
    /// The trigger was consulted this iteration.
    pub trigger_checked: bool,
    /// The index was rebuilt this iteration.
    pub committed: bool,
    /// A checkpoint was written this iteration.
    pub checkpointed: bool,
    /// Reservoir slots the maintainer changed.
    pub reservoir_changed: Vec<usize>,
}

/// State of one trial, advanced one iteration at a time.
///
/// Owns the current projection, the published index, the reservoir, the
/// schedule and the cost counters. Nothing here is shared across trials.
#[derive(Debug)]
pub struct TrainingRun<'d> {
    dataset: &'d Dataset,
    config: TrainingConfig,
    trial: usize,
    method: String,
    schedule: TrainingSchedule,
    checkpoint_iters: BTreeSet<usize>,
    current: Projection,
    index: PublishedIndex,
    reservoir: Reservoir,
    stats: CostStats,
    next_iteration: usize,
}

impl<'d> TrainingRun<'d> {
    /// Validate the configuration, initialize the projection, build the
    /// initial index, draw the schedule and allocate the reservoir.
    pub fn init<L: HashLearner + ?Sized>(
        dataset: &'d Dataset,
        config: &TrainingConfig,
        trial: usize,
        checkpoint_iters: &[usize],
        learner: &mut L,
    ) -> Result<Self> {
        config.validate(dataset.len())?;

        let mut config = config.clone();
        let base_seed = config.seed;
        config.seed = derive_seed(base_seed, trial, LEARNER_STREAM);
        let method = method_name(&config, learner);

        let schedule = TrainingSchedule::build(
            &config,
            dataset.len(),
            derive_seed(base_seed, trial, SCHEDULE_STREAM),
        )?;
        let num_iterations = schedule.num_iterations();

        let mut requested = BTreeSet::new();
        for &it in checkpoint_iters {
            if it == 0 || it > num_iterations {
                warn!(
                    iteration = it,
                    num_iterations, "checkpoint iteration outside the run, ignored"
                );
            } else {
                requested.insert(it);
            }
        }

        let current = learner.initialize(dataset.features(), &config)?;
        let index = PublishedIndex::build(dataset.features(), current.clone())?;
        let supervised = !config.unsupervised && dataset.labels().is_labeled();
        let reservoir = Reservoir::new(
            config.reservoir_size,
            dataset.dim(),
            current.bits(),
            supervised,
        );

        debug!(
            trial,
            method = %method,
            stream_len = schedule.len(),
            num_iterations,
            bits = current.bits(),
            reservoir = config.reservoir_size,
            "initialized training run"
        );

        Ok(Self {
            dataset,
            config,
            trial,
            method,
            schedule,
            stats: CostStats::new(requested.iter().copied().collect()),
            checkpoint_iters: requested,
            current,
            index,
            reservoir,
            next_iteration: 1,
        })
    }

    /// Run one iteration. Returns `None` once the schedule is exhausted.
    pub fn step<L, M, T>(
        &mut self,
        learner: &mut L,
        maintainer: &mut M,
        trigger: &T,
        store: &dyn CheckpointStore,
    ) -> Result<Option<StepOutcome>>
    where
        L: HashLearner + ?Sized,
        M: ReservoirMaintainer + ?Sized,
        T: TriggerPolicy + ?Sized,
    {
        let iteration = self.next_iteration;
        if iteration > self.num_iterations() {
            return Ok(None);
        }
        let batch = self.schedule.batch(iteration);

        // learn
        let start = Instant::now();
        let (current, used) = learner.update(
            self.current.clone(),
            self.dataset,
            batch,
            iteration,
            &self.config,
        )?;
        self.current = current;
        self.stats.time_train += start.elapsed();

        // maintain reservoir, check trigger
        let start = Instant::now();
        let mut reservoir_changed = Vec::new();
        let mut candidate: Option<BinaryCodes> = None;
        if let Reservoir::Active(sample) = &self.reservoir {
            let features = self.dataset.features().select_rows(&used)?;
            let labels = if self.config.unsupervised {
                Labels::Unlabeled
            } else {
                self.dataset.labels().select(&used)?
            };
            let (sample, changed) = maintainer.update(
                sample.clone(),
                &features,
                &labels,
                self.config.reservoir_size,
                self.index.committed(),
                self.config.unsupervised,
            )?;
            candidate = Some(self.current.encode(sample.features())?);
            self.reservoir = Reservoir::Active(sample);
            reservoir_changed = changed;
        }

        let trigger_checked = self.config.is_trigger_iteration(iteration);
        let update_table = if trigger_checked {
            trigger.decide(&TriggerContext {
                iteration,
                committed: self.index.committed(),
                current: &self.current,
                reservoir: &self.reservoir,
                candidate: candidate.as_ref(),
            })?
        } else {
            false
        };
        self.stats.time_reserve += start.elapsed();

        if update_table {
            self.commit(iteration, candidate)?;
        }

        let checkpointed = self.checkpoint_iters.contains(&iteration);
        if checkpointed {
            self.write_checkpoint(iteration, store)?;
        }

        self.next_iteration += 1;
        Ok(Some(StepOutcome {
            iteration,
            trigger_checked,
            committed: update_table,
            checkpointed,
            reservoir_changed,
        }))
    }

    /// Publish the current projection: rebuild the table and adopt the
    /// candidate reservoir codes. Nothing is assigned unless both succeed.
    fn commit(&mut self, iteration: usize, candidate: Option<BinaryCodes>) -> Result<()> {
        let start = Instant::now();
        let index = PublishedIndex::build(self.dataset.features(), self.current.clone())?;
        if let (Reservoir::Active(sample), Some(codes)) = (&mut self.reservoir, candidate) {
            sample.replace_codes(codes)?;
        }
        let bits = index.size_bits();
        self.index = index;
        self.stats.record_commit(iteration, bits, start.elapsed());

        debug!(
            trial = self.trial,
            iteration,
            bits,
            commits = self.stats.ht_updates(),
            "hash table rebuilt"
        );
        Ok(())
    }

    fn write_checkpoint(&self, iteration: usize, store: &dyn CheckpointStore) -> Result<()> {
        let checkpoint = Checkpoint {
            trial: self.trial,
            iteration,
            current: self.current.clone(),
            index: self.index.clone(),
            stats: self.stats.clone(),
        };
        store.write(&checkpoint)?;

        info!(
            "[{}] trial {} iter {}/{}: train {:.3}s, update {:.3}s ({} commits, {} bits), reservoir {:.3}s",
            self.method,
            self.trial,
            iteration,
            self.num_iterations(),
            self.stats.time_train.as_secs_f64(),
            self.stats.time_update.as_secs_f64(),
            self.stats.ht_updates(),
            self.stats.bits_computed,
            self.stats.time_reserve.as_secs_f64(),
        );
        Ok(())
    }

    pub fn trial(&self) -> usize {
        self.trial
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Config with the trial-specialized seed.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn schedule(&self) -> &TrainingSchedule {
        &self.schedule
    }

    pub fn num_iterations(&self) -> usize {
        self.schedule.num_iterations()
    }

    /// Iterations completed so far.
    pub fn iterations_done(&self) -> usize {
        self.next_iteration - 1
    }

    pub fn is_finished(&self) -> bool {
        self.iterations_done() >= self.num_iterations()
    }

    /// Learner's current projection.
    pub fn current(&self) -> &Projection {
        &self.current
    }

    /// Published index and its committed projection.
    pub fn index(&self) -> &PublishedIndex {
        &self.index
    }

    pub fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    pub fn stats(&self) -> &CostStats {
        &self.stats
    }

    /// Drop the matrices and keep the scalar summary.
    pub fn finish(self) -> RunSummary {
        self.stats
            .summary(self.trial, &self.method, self.schedule.num_iterations())
    }
}

/// Drives full runs with one learner, reservoir maintainer and trigger.
///
/// # Type Parameters
///
/// - `L`: hash learner
/// - `M`: reservoir maintainer (unused when `reservoir_size == 0`)
/// - `T`: trigger policy
pub struct OnlineTrainer<L, M, T> {
    config: TrainingConfig,
    learner: L,
    maintainer: M,
    trigger: T,
    store: Arc<dyn CheckpointStore>,
}

impl<L, M, T> OnlineTrainer<L, M, T>
where
    L: HashLearner,
    M: ReservoirMaintainer,
    T: TriggerPolicy,
{
    /// Create a trainer that checkpoints into memory.
    pub fn new(config: TrainingConfig, learner: L, maintainer: M, trigger: T) -> Self {
        Self {
            config,
            learner,
            maintainer,
            trigger,
            store: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    /// Use a different checkpoint store.
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    /// Run one trial to completion.
    ///
    /// Any learner, reservoir, trigger or checkpoint failure aborts the run
    /// and is returned as is; nothing is retried.
    pub fn run(
        &mut self,
        dataset: &Dataset,
        trial: usize,
        checkpoint_iters: &[usize],
    ) -> Result<RunSummary> {
        let span = info_span!(
            "trial",
            trial,
            method = %method_name(&self.config, &self.learner),
            run = %self.config.identifier
        );
        let _guard = span.enter();

        let mut run = TrainingRun::init(
            dataset,
            &self.config,
            trial,
            checkpoint_iters,
            &mut self.learner,
        )?;

        while run
            .step(
                &mut self.learner,
                &mut self.maintainer,
                &self.trigger,
                self.store.as_ref(),
            )?
            .is_some()
        {}

        let summary = run.finish();
        info!(
            "[{}] trial {} done: {} iterations, {} commits, {} bits, train {:.3}s, update {:.3}s, reservoir {:.3}s",
            summary.method,
            trial,
            summary.iterations,
            summary.ht_updates,
            summary.bits_computed,
            summary.time_train,
            summary.time_update,
            summary.time_reserv,
        );
        Ok(summary)
    }
}
