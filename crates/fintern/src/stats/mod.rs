//! Stats Module - Table Statistics
//!
//! Counters are relaxed atomics bumped on the hot paths; they are monotonic and
//! only meant for monitoring and tests, never for synchronization.

pub mod metrics;
pub mod timer;

pub use metrics::{MetricValue, TableMetrics};
pub use timer::SweepTimer;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one table
#[derive(Debug, Default)]
pub struct TableStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    inserts: AtomicU64,
    cas_retries: AtomicU64,
    expansions: AtomicU64,
    pruned_heads: AtomicU64,
    swept_dead: AtomicU64,
    swept_live: AtomicU64,
    relocated: AtomicU64,
    retired: AtomicU64,
    freed: AtomicU64,
    sweeps: AtomicU64,
}

macro_rules! counter {
    ($($record:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub(crate) fn $record(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl TableStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_lookup => lookups,
        record_hit => hits,
        record_insert => inserts,
        record_cas_retry => cas_retries,
        record_expansion => expansions,
        record_pruned_head => pruned_heads,
        record_swept_dead => swept_dead,
        record_swept_live => swept_live,
        record_relocated => relocated,
        record_retired => retired,
        record_freed => freed,
        record_sweep => sweeps,
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            expansions: self.expansions.load(Ordering::Relaxed),
            pruned_heads: self.pruned_heads.load(Ordering::Relaxed),
            swept_dead: self.swept_dead.load(Ordering::Relaxed),
            swept_live: self.swept_live.load(Ordering::Relaxed),
            relocated: self.relocated.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`TableStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub inserts: u64,
    pub cas_retries: u64,
    pub expansions: u64,
    pub pruned_heads: u64,
    pub swept_dead: u64,
    pub swept_live: u64,
    pub relocated: u64,
    pub retired: u64,
    pub freed: u64,
    pub sweeps: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups that found an existing entry
    pub fn hit_ratio(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Outcome of sweeping one shard, or a whole generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Entries whose referent died and that were unlinked
    pub dead: u64,
    /// Entries kept in place
    pub live: u64,
    /// Live entries whose slot now points at a forwarded referent
    pub relocated: u64,
    /// Root child slots left empty after the sweep
    pub empty_slots: u64,
    /// Entries physically freed by this generation's clean-up
    pub freed: u64,
    /// Wall time from start to clean-up, set by the coordinator
    pub duration_us: u64,
}

impl SweepSummary {
    pub fn merge(&mut self, other: &SweepSummary) {
        self.dead += other.dead;
        self.live += other.live;
        self.relocated += other.relocated;
        self.empty_slots += other.empty_slots;
        self.freed += other.freed;
        self.duration_us = self.duration_us.max(other.duration_us);
    }
}
