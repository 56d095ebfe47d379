//! Sweep Module - Weak Reference Sweeping
//!
//! The collector's weak-reference phase drives a [`SweepCoordinator`], which
//! partitions a sweep generation into per-shard tasks on a worker pool. Entries
//! unlinked by those tasks wait on each shard's [`DeferredFreeList`] until the
//! generation has passed its safepoint.
//!
//! ```text
//!  Finished ──start──▶ Sweeping ──last shard──▶ Pending ──suspend, clean up──▶ Finished
//! ```

pub mod coordinator;
pub mod deferred;

pub use coordinator::{SweepCoordinator, SweepState};
pub use deferred::DeferredFreeList;
