//! Sweep Coordinator
//!
//! Runs one sweep generation over every shard of a table.
//!
//! ## Concurrent sweep
//!
//! 1. [`start_sweep_weak_ref_task`](SweepCoordinator::start_sweep_weak_ref_task)
//!    opens a generation and posts up to `min(threads, shards)` tasks. Every task
//!    claims shard indices from an atomic iterator until none are left.
//! 2. [`join_and_wait_sweep_weak_ref_task`](SweepCoordinator::join_and_wait_sweep_weak_ref_task)
//!    lets the initiating thread claim shards too, then blocks until the last
//!    shard is done and the state is `Pending`.
//! 3. [`wait_concurrent_sweep_weak_ref_task_and_suspend`](SweepCoordinator::wait_concurrent_sweep_weak_ref_task_and_suspend)
//!    suspends all mutators, releases the generation's deferred entries, leaves
//!    the sweeping state and resumes the mutators.
//!
//! Each generation has its own shard iterator and pending counter, so a task
//! that only gets scheduled after its generation finished finds nothing to claim.

use crate::assert_context;
use crate::barrier::{BarrierMode, SweepVisitor};
use crate::error::{InternError, Result};
use crate::logging::{LoggerConfig, TableEvent, TableLogger};
use crate::runtime::{MutatorSuspender, Task, TaskPool};
use crate::stats::{SweepSummary, SweepTimer};
use crate::trie::HashTrie;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Phase of the coordinator's current sweep generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepState {
    /// No sweep in progress
    Finished,
    /// Shard tasks are running
    Sweeping,
    /// Every shard is swept; deferred entries wait for the safepoint
    Pending,
}

/// One sweep generation
struct SweepRound {
    generation: u64,
    visitor: SweepVisitor,
    /// Next unclaimed shard
    next_shard: AtomicUsize,
    /// Shards not yet swept
    pending: AtomicUsize,
    summary: Mutex<SweepSummary>,
    timer: SweepTimer,
}

struct Phase {
    state: SweepState,
    round: Option<Arc<SweepRound>>,
}

/// State shared with posted tasks
struct Control {
    table: Arc<HashTrie>,
    logger: Arc<TableLogger>,
    phase: Mutex<Phase>,
    changed: Condvar,
}

impl Control {
    /// Claim and sweep shards of `round` until none are left
    fn sweep_claimed_shards(&self, round: &SweepRound) {
        let root_size = self.table.root_size();
        loop {
            let shard = round.next_shard.fetch_add(1, Ordering::AcqRel);
            if shard >= root_size {
                break;
            }

            let summary = self
                .table
                .sweep_shard(shard, &round.visitor, round.generation);
            round.summary.lock().merge(&summary);
            self.logger.log(TableEvent::ShardSwept {
                generation: round.generation,
                shard,
                dead: summary.dead,
                live: summary.live,
            });

            if round.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                let mut phase = self.phase.lock();
                phase.state = SweepState::Pending;
                // Logged under the phase lock so it precedes the waiter's events
                self.logger.log(TableEvent::SweepPending {
                    generation: round.generation,
                    deferred: self.table.deferred_len(),
                });
                self.changed.notify_all();
            }
        }
    }

    /// The round currently in progress
    fn current_round(&self) -> Result<Arc<SweepRound>> {
        let phase = self.phase.lock();
        phase
            .round
            .clone()
            .ok_or_else(|| InternError::invalid_state("sweep in progress", "Finished"))
    }
}

/// Orchestrates sweep generations of one table
pub struct SweepCoordinator {
    control: Arc<Control>,
    pool: Arc<dyn TaskPool>,
    suspender: Arc<dyn MutatorSuspender>,
}

impl SweepCoordinator {
    pub fn new(
        table: Arc<HashTrie>,
        pool: Arc<dyn TaskPool>,
        suspender: Arc<dyn MutatorSuspender>,
    ) -> Self {
        let logger = TableLogger::new(LoggerConfig::from_table(table.config()));
        Self::with_logger(table, pool, suspender, Arc::new(logger))
    }

    pub fn with_logger(
        table: Arc<HashTrie>,
        pool: Arc<dyn TaskPool>,
        suspender: Arc<dyn MutatorSuspender>,
        logger: Arc<TableLogger>,
    ) -> Self {
        Self {
            control: Arc::new(Control {
                table,
                logger,
                phase: Mutex::new(Phase {
                    state: SweepState::Finished,
                    round: None,
                }),
                changed: Condvar::new(),
            }),
            pool,
            suspender,
        }
    }

    pub fn table(&self) -> &Arc<HashTrie> {
        &self.control.table
    }

    pub fn logger(&self) -> &Arc<TableLogger> {
        &self.control.logger
    }

    pub fn state(&self) -> SweepState {
        self.control.phase.lock().state
    }

    /// Open a concurrent sweep generation and post its shard tasks
    ///
    /// Returns the generation number. Only `NeedSlotBarrier` tables can be swept
    /// concurrently.
    pub fn start_sweep_weak_ref_task(&self, visitor: SweepVisitor) -> Result<u64> {
        let table = &self.control.table;
        let mode = table.barrier_mode();
        if mode != BarrierMode::NeedSlotBarrier {
            return Err(InternError::UnsupportedMode {
                operation: "concurrent sweep",
                mode,
            });
        }
        assert_context!(
            visitor.mode() == mode,
            "{:?} cannot sweep a {:?} table",
            visitor,
            mode
        );

        let mut phase = self.control.phase.lock();
        if phase.state != SweepState::Finished {
            return Err(InternError::invalid_state(
                "Finished",
                format!("{:?}", phase.state),
            ));
        }
        let generation = table.start_sweeping()?;
        let root_size = table.root_size();
        let round = Arc::new(SweepRound {
            generation,
            visitor,
            next_shard: AtomicUsize::new(0),
            pending: AtomicUsize::new(root_size),
            summary: Mutex::new(SweepSummary::default()),
            timer: SweepTimer::new(),
        });
        phase.state = SweepState::Sweeping;
        phase.round = Some(Arc::clone(&round));
        drop(phase);

        let tasks = self.pool.total_thread_num().min(root_size);
        self.control.logger.log(TableEvent::SweepStarted {
            generation,
            concurrent: true,
            tasks,
        });

        for posted in 0..tasks {
            let control = Arc::clone(&self.control);
            let round = Arc::clone(&round);
            let task: Task = Box::new(move || control.sweep_claimed_shards(&round));
            if let Err(e) = self.pool.post_task(task) {
                // Unclaimed shards are picked up by the joining or waiting thread.
                log::warn!(
                    "sweep {}: posted {} of {} tasks: {}",
                    generation,
                    posted,
                    tasks,
                    e
                );
                break;
            }
        }
        Ok(generation)
    }

    /// Sweep shards on the calling thread, then wait until every shard is done
    pub fn join_and_wait_sweep_weak_ref_task(&self) -> Result<()> {
        let round = self.control.current_round()?;
        self.control.sweep_claimed_shards(&round);

        let mut phase = self.control.phase.lock();
        while phase.state == SweepState::Sweeping {
            self.control.changed.wait(&mut phase);
        }
        Ok(())
    }

    /// Wait for the shard tasks, then release the generation under a safepoint
    ///
    /// Unclaimed shards are swept on the calling thread first.
    pub fn wait_concurrent_sweep_weak_ref_task_and_suspend(&self) -> Result<SweepSummary> {
        let round = self.control.current_round()?;
        self.control.sweep_claimed_shards(&round);

        {
            let mut phase = self.control.phase.lock();
            while phase.state == SweepState::Sweeping {
                self.control.changed.wait(&mut phase);
            }
            // Only one waiter completes the generation.
            match phase.round.take() {
                Some(current) if Arc::ptr_eq(&current, &round) => {},
                other => {
                    phase.round = other;
                    return Err(InternError::invalid_state(
                        "Pending",
                        format!("{:?}", phase.state),
                    ));
                },
            }
        }

        self.suspender.suspend_all();
        let released = self.clean_up(round.generation);
        let finished = self.control.table.finish_sweeping();
        {
            let mut phase = self.control.phase.lock();
            phase.state = SweepState::Finished;
            self.control.changed.notify_all();
        }
        self.suspender.resume_all();
        finished?;

        let mut summary = *round.summary.lock();
        summary.freed = released as u64;
        summary.duration_us = round.timer.elapsed_us();
        self.control.logger.log(TableEvent::SweepFinished {
            generation: round.generation,
            duration_ms: round.timer.elapsed_ms(),
            summary,
        });
        Ok(summary)
    }

    /// Release every deferred entry of `safe_generation` and older
    ///
    /// The caller vouches that the generation has passed its safepoint.
    pub fn clean_up(&self, safe_generation: u64) -> usize {
        let released = self.control.table.clean_up(safe_generation);
        self.control.logger.log(TableEvent::CleanedUp {
            generation: safe_generation,
            released,
        });
        released
    }

    /// Sweep every shard on the calling thread with all mutators suspended
    ///
    /// Available in both barrier modes.
    pub fn sweep_stop_the_world(&self, visitor: SweepVisitor) -> Result<SweepSummary> {
        let table = &self.control.table;
        {
            let mut phase = self.control.phase.lock();
            if phase.state != SweepState::Finished {
                return Err(InternError::invalid_state(
                    "Finished",
                    format!("{:?}", phase.state),
                ));
            }
            phase.state = SweepState::Sweeping;
        }

        let timer = SweepTimer::new();
        self.suspender.suspend_all();
        let outcome = table.start_sweeping().map(|generation| {
            self.control.logger.log(TableEvent::SweepStarted {
                generation,
                concurrent: false,
                tasks: 0,
            });
            let mut summary = SweepSummary::default();
            for shard in 0..table.root_size() {
                summary.merge(&table.sweep_shard(shard, &visitor, generation));
            }
            summary.freed = self.clean_up(generation) as u64;
            (generation, summary)
        });
        let finished = match &outcome {
            Ok(_) => table.finish_sweeping(),
            Err(_) => Ok(()),
        };
        self.suspender.resume_all();
        {
            let mut phase = self.control.phase.lock();
            phase.state = SweepState::Finished;
            self.control.changed.notify_all();
        }

        let (generation, mut summary) = outcome?;
        finished?;
        summary.duration_us = timer.elapsed_us();
        self.control.logger.log(TableEvent::SweepFinished {
            generation,
            duration_ms: timer.elapsed_ms(),
            summary,
        });
        Ok(summary)
    }

    /// Clear the table and record the event
    pub fn clear(&self) -> Result<()> {
        self.control.table.clear()?;
        self.control.logger.log(TableEvent::Cleared);
        Ok(())
    }
}

impl fmt::Debug for SweepCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepCoordinator")
            .field("state", &self.state())
            .field("table", &self.control.table)
            .field("threads", &self.pool.total_thread_num())
            .finish()
    }
}
