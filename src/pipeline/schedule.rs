use crate::arguments::Config;
use crate::pipeline::assemble::SegmentTable;
use crate::pipeline::batch::BatchOutcome;
use crate::pipeline::plan::BatchSpec;
use crate::pipeline::progress::Progress;

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use tracing::{debug, error};

/// Fixed-size worker pool fed in batch order, one submission per stagger interval.
pub struct Scheduler {
    pool_size: usize,
    stagger_delay: Duration,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            pool_size: config.max_concurrent_batches.max(1),
            stagger_delay: config.stagger_delay,
        }
    }

    /// Runs every batch and returns their segments indexed by batch, with deferred reassemblies joined.
    ///
    /// The stagger delay is paid before every submission, even when the pool has idle workers.
    pub fn run<W>(&self, specs: Vec<BatchSpec>, progress: &Progress, work: W) -> SegmentTable
    where
        W: Fn(&BatchSpec) -> BatchOutcome + Sync,
    {
        let batch_count = specs.len();
        let (spec_sender, spec_receiver) = unbounded::<BatchSpec>();
        let (outcome_sender, outcome_receiver) = unbounded::<(usize, BatchOutcome)>();

        thread::scope(|scope| {
            for _ in 0..self.pool_size.min(batch_count) {
                let spec_receiver = spec_receiver.clone();
                let outcome_sender = outcome_sender.clone();
                let work = &work;
                scope.spawn(move || {
                    for spec in spec_receiver.iter() {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&spec)))
                            .unwrap_or_else(|_| {
                                error!("Batch {} generated a panic", spec.index);
                                BatchOutcome::Failed
                            });
                        progress.complete_batch();
                        if outcome_sender.send((spec.index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(outcome_sender);

            for spec in specs {
                thread::sleep(self.stagger_delay);
                debug!("Submitting batch {} (start {:.3}s, {:.3}s)", spec.index, spec.start, spec.duration);
                if spec_sender.send(spec).is_err() {
                    break;
                }
            }
            drop(spec_sender);
        });

        let mut outcomes: Vec<Option<BatchOutcome>> = (0..batch_count).map(|_| None).collect();
        for (index, outcome) in outcome_receiver.iter() {
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
        }
        SegmentTable::resolve(outcomes)
    }
}
