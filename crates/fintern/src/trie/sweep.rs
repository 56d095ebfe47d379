//! Sweeping the trie
//!
//! Dead entries are unlinked with the same CAS discipline mutators use: a chain
//! head through its trie slot, an interior entry through its predecessor's
//! `overflow`. While a concurrent sweep is in flight the sweeper is the only
//! party that unlinks; outside of it, lookups in `NeedSlotBarrier` mode prune dead
//! heads themselves. Whoever wins the unlinking CAS owns the entry, so an entry is
//! retired exactly once.

use super::node::{entry_slot, Entry, Indirect, Node, Slot};
use super::HashTrie;
use crate::assert_context;
use crate::barrier::{BarrierMode, Liveness, SweepVisitor};
use crate::error::{InternError, Result};
use crate::stats::SweepSummary;
use crossbeam::epoch::{self, Guard, Shared};
use std::sync::atomic::Ordering;

/// What happens to an entry once it is unlinked
enum Reclaim<'a> {
    /// Free on the spot; only with exclusive access to the table
    Immediate,
    /// Collect for the shard's deferred free list
    Deferred(&'a mut Vec<*mut Entry>),
}

impl Reclaim<'_> {
    fn take(&mut self, entry: Shared<'_, Entry>) {
        match self {
            Reclaim::Immediate => drop(unsafe { entry.into_owned() }),
            Reclaim::Deferred(wait_delete) => wait_delete.push(entry.as_raw() as *mut Entry),
        }
    }
}

impl HashTrie {
    /// Enter the sweeping state and open a new generation
    ///
    /// Returns the generation number the sweep's retired entries are tagged with.
    pub fn start_sweeping(&self) -> Result<u64> {
        let _lock = self.mutex.lock();
        if self.sweeping.load(Ordering::Acquire) {
            return Err(InternError::invalid_state("not sweeping", "sweeping"));
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.sweeping.store(true, Ordering::Release);
        log::debug!("sweep generation {} started", generation);
        Ok(generation)
    }

    /// Leave the sweeping state; lookups may prune again
    pub fn finish_sweeping(&self) -> Result<()> {
        let _lock = self.mutex.lock();
        if !self.sweeping.load(Ordering::Acquire) {
            return Err(InternError::invalid_state("sweeping", "not sweeping"));
        }
        self.sweeping.store(false, Ordering::Release);
        self.stats.record_sweep(1);
        Ok(())
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    /// Newest sweep generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Sweep the whole table with exclusive access
    ///
    /// Dead entries are freed immediately. Works in both barrier modes.
    pub fn sweep_weak_refs(&mut self, visitor: &SweepVisitor) -> SweepSummary {
        self.check_visitor(visitor);
        let guard = unsafe { epoch::unprotected() };
        let mut summary = SweepSummary::default();
        let mut reclaim = Reclaim::Immediate;

        for shard in 0..self.shards.len() {
            let root = unsafe { self.root(shard, guard).deref() };
            for index in 0..root.children().len() {
                if self.clear_node_from_gc(root, index, visitor, &mut reclaim, guard, &mut summary) {
                    summary.empty_slots += 1;
                }
            }
        }

        summary.freed = summary.dead;
        self.record_summary(&summary);
        self.stats.record_freed(summary.freed);
        self.stats.record_sweep(1);
        log::debug!(
            "stop-the-world sweep: {} dead, {} live, {} relocated",
            summary.dead,
            summary.live,
            summary.relocated
        );
        summary
    }

    /// Sweep one shard while mutators may be running
    ///
    /// Unlinked entries are parked on the shard's deferred list under `generation`.
    /// Must run between [`start_sweeping`](Self::start_sweeping) and
    /// [`finish_sweeping`](Self::finish_sweeping).
    pub(crate) fn sweep_shard(
        &self,
        shard: usize,
        visitor: &SweepVisitor,
        generation: u64,
    ) -> SweepSummary {
        assert_context!(
            self.is_sweeping(),
            "shard {} swept outside of a sweep generation",
            shard
        );
        self.check_visitor(visitor);

        let scope = self.scope();
        let guard = scope.guard();
        let mut summary = SweepSummary::default();
        let mut wait_delete = Vec::new();
        let mut reclaim = Reclaim::Deferred(&mut wait_delete);

        let root = unsafe { self.root(shard, guard).deref() };
        for index in 0..root.children().len() {
            if self.clear_node_from_gc(root, index, visitor, &mut reclaim, guard, &mut summary) {
                summary.empty_slots += 1;
            }
        }

        let retired = wait_delete.len() as u64;
        self.shards[shard].deferred.retire_batch(wait_delete, generation);
        self.stats.record_retired(retired);
        self.record_summary(&summary);
        log::debug!(
            "shard {} swept: {} dead, {} live",
            shard,
            summary.dead,
            summary.live
        );
        summary
    }

    /// Hand every deferred entry of generation `safe_generation` or older to the
    /// epoch collector
    ///
    /// Returns the number of entries released.
    pub fn clean_up(&self, safe_generation: u64) -> usize {
        let guard = epoch::pin();
        let released: usize = self
            .shards
            .iter()
            .map(|shard| shard.deferred.release(safe_generation, &guard))
            .sum();
        guard.flush();
        self.stats.record_freed(released as u64);
        released
    }

    /// Sweep the subtree at `parent.children[index]`
    ///
    /// Returns whether the slot is empty afterwards. Indirect nodes are kept even
    /// when every child died.
    fn clear_node_from_gc(
        &self,
        parent: &Indirect,
        index: usize,
        visitor: &SweepVisitor,
        reclaim: &mut Reclaim<'_>,
        guard: &Guard,
        summary: &mut SweepSummary,
    ) -> bool {
        let slot = parent.child(index);
        'reload: loop {
            match Node::classify(slot.load(Ordering::Acquire, guard)) {
                Node::Empty => return true,
                Node::Indirect(child) => {
                    let child = unsafe { child.deref() };
                    for index in 0..child.children().len() {
                        self.clear_node_from_gc(child, index, visitor, reclaim, guard, summary);
                    }
                    return false;
                },
                Node::Entry(first) => {
                    let mut pass = SweepSummary::default();

                    // Dead heads go through the slot.
                    let mut head = first;
                    loop {
                        let entry = unsafe { head.deref() };
                        match visitor.evaluate(entry.value()) {
                            Liveness::Dead => {
                                let next = entry.overflow().load(Ordering::Acquire, guard);
                                if slot
                                    .compare_exchange(
                                        entry_slot(head),
                                        entry_slot(next),
                                        Ordering::AcqRel,
                                        Ordering::Acquire,
                                        guard,
                                    )
                                    .is_err()
                                {
                                    summary.merge(&pass);
                                    continue 'reload;
                                }
                                pass.dead += 1;
                                reclaim.take(head);
                                if next.is_null() {
                                    summary.merge(&pass);
                                    return true;
                                }
                                head = next;
                            },
                            verdict => {
                                pass.count_live(verdict);
                                break;
                            },
                        }
                    }

                    // Interior entries go through their predecessor, which is live.
                    let mut prev = unsafe { head.deref() };
                    loop {
                        let current = prev.overflow().load(Ordering::Acquire, guard);
                        let entry = match unsafe { current.as_ref() } {
                            Some(entry) => entry,
                            None => break,
                        };
                        match visitor.evaluate(entry.value()) {
                            Liveness::Dead => {
                                let next = entry.overflow().load(Ordering::Acquire, guard);
                                if prev
                                    .overflow()
                                    .compare_exchange(
                                        current,
                                        next,
                                        Ordering::AcqRel,
                                        Ordering::Acquire,
                                        guard,
                                    )
                                    .is_ok()
                                {
                                    pass.dead += 1;
                                    reclaim.take(current);
                                }
                            },
                            verdict => {
                                pass.count_live(verdict);
                                prev = entry;
                            },
                        }
                    }

                    summary.merge(&pass);
                    return false;
                },
            }
        }
    }

    /// Skip dead entries at the head of a chain, unlinking them when allowed
    ///
    /// Returns the first entry whose value reads as alive, or null. Outside of a
    /// sweep the dead head is unlinked with a CAS on `slot` and retired to the
    /// shard's deferred list; during a sweep it is only skipped.
    pub(crate) fn prune_head<'g>(
        &self,
        shard: usize,
        slot: &Slot,
        mut head: Shared<'g, Entry>,
        guard: &'g Guard,
    ) -> Shared<'g, Entry> {
        if self.barrier.mode() != BarrierMode::NeedSlotBarrier {
            return head;
        }

        while let Some(entry) = unsafe { head.as_ref() } {
            if self.barrier.read_value(entry.value()).is_some() {
                break;
            }
            let next = entry.overflow().load(Ordering::Acquire, guard);
            if self.is_sweeping() {
                return next;
            }
            match slot.compare_exchange(
                entry_slot(head),
                entry_slot(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    entry.value().clear();
                    self.shards[shard].deferred.retire(head, self.generation());
                    self.stats.record_pruned_head(1);
                    self.stats.record_retired(1);
                    log::trace!("pruned dead head with key {:#x}", entry.key());
                },
                // Someone else changed the slot first; only skip.
                Err(_) => return next,
            }
            head = next;
        }
        head
    }

    fn check_visitor(&self, visitor: &SweepVisitor) {
        assert_context!(
            visitor.mode() == self.barrier.mode(),
            "{:?} used on a {:?} table",
            visitor,
            self.barrier.mode()
        );
    }

    fn record_summary(&self, summary: &SweepSummary) {
        self.stats.record_swept_dead(summary.dead);
        self.stats.record_swept_live(summary.live);
        self.stats.record_relocated(summary.relocated);
    }
}

impl SweepSummary {
    fn count_live(&mut self, verdict: Liveness) {
        self.live += 1;
        if verdict == Liveness::Relocated {
            self.relocated += 1;
        }
    }
}
