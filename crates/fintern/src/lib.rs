//! # fintern - Concurrent String-Interning Table
//!
//! fintern is the string table of a managed runtime: it deduplicates immutable
//! strings so equal contents share one heap object, and it stays correct while
//! many mutator threads intern concurrently and a tracing collector sweeps dead
//! entries in parallel.
//!
//! ## Overview
//!
//! - **Lock-free hash trie**: lookups and inserts only use acquire loads and CAS
//!   publication; the table mutex is reserved for clear and sweep transitions
//! - **Sharded roots**: a power-of-two number of independent tries, the unit of
//!   parallel sweeping
//! - **Two slot-barrier modes**: a moving collector with weak field visitors, or a
//!   non-moving collector answering liveness through a root visitor
//! - **Deferred reclamation**: unlinked entries are retired per generation and
//!   freed through epoch-based reclamation, never under a running reader
//!
//! ## Quick Start
//!
//! ```rust
//! use fintern::ObjectRef;
//!
//! fn main() -> Result<(), fintern::InternError> {
//!     let table = fintern::init()?;
//!
//!     // The host supplies the hash, the equality check and the constructor.
//!     let hash = 0x1234_5678;
//!     let first = table.load_or_store(hash, |_| false, || ObjectRef::new(0x1000).unwrap());
//!     let again = table.load_or_store(hash, |v| v == first, || unreachable!());
//!     assert_eq!(first, again);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Mutator Threads                        │
//! │     load / store_or_load / load_or_store (InUseScope)     │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ CAS publish, prune dead heads
//! ┌────────────────────────────▼─────────────────────────────┐
//! │ HashTrie   shard 0   shard 1   ...   shard N-1            │
//! │            Indirect ─▶ Indirect ─▶ Entry ─▶ Entry         │
//! │            DeferredFreeList per shard                     │
//! └────────────────────────────▲─────────────────────────────┘
//!                              │ sweep_shard (claimed by index)
//! ┌────────────────────────────┴─────────────────────────────┐
//! │ SweepCoordinator ──post_task──▶ TaskPool workers          │
//! │   Finished ▶ Sweeping ▶ Pending ▶ suspend_all ▶ clean_up  │
//! └──────────────────────────────────────────────────────────┘
//! ```

// Table core
pub mod barrier;
pub mod config;
pub mod error;
pub mod object;
pub mod trie;

// Collector integration
pub mod runtime;
pub mod sweep;

// Monitoring
pub mod logging;
pub mod stats;

pub use barrier::{
    BarrierMode, RawReadBarrier, ReadBarrier, SlotBarrier, SweepVisitor, WeakRefFieldVisitor,
    WeakRootVisitor,
};
pub use config::{ConfigError, TableConfig};
pub use error::{InternError, Result};
pub use logging::{LogLevel, LoggerConfig, TableEvent, TableLogger};
pub use object::{ObjectRef, ValueSlot};
pub use runtime::{
    MutatorSuspender, NoSuspension, SafepointManager, SweepThreadPool, Task, TaskPool,
};
pub use stats::{StatsSnapshot, SweepSummary, TableMetrics};
pub use sweep::{SweepCoordinator, SweepState};
pub use trie::{HashTrie, InUseScope, LoadResult, Position};

/// fintern version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a table with the default configuration
///
/// Slots are read raw; hosts with a moving collector pass their own read barrier
/// to [`HashTrie::new`].
pub fn init() -> Result<HashTrie> {
    init_with_config(TableConfig::default())
}

/// Create a table for `config` with a raw read barrier
pub fn init_with_config(config: TableConfig) -> Result<HashTrie> {
    let barrier = match config.barrier_mode {
        BarrierMode::NeedSlotBarrier => SlotBarrier::need(RawReadBarrier),
        BarrierMode::NoSlotBarrier => SlotBarrier::NoSlotBarrier,
    };
    HashTrie::new(config, barrier)
}
