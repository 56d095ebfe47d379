//! Configuration Module - Table Tuning Parameters
//!
//! Branching factor, shard count and slot-barrier mode are fixed at construction
//! time. The sweep worker count and logging switches only affect the default
//! collaborators.

use crate::barrier::BarrierMode;

/// Main configuration for the interning table
///
/// # Examples
///
/// ```rust
/// use fintern::{BarrierMode, TableConfig};
///
/// let config = TableConfig::default();
/// assert_eq!(config.children_log2, 3);
///
/// // Non-moving collector, 64 shards
/// let config = TableConfig {
///     root_size: 64,
///     barrier_mode: BarrierMode::NoSlotBarrier,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Bits of hash consumed per trie level
    ///
    /// Each `Indirect` node has `1 << children_log2` child slots.
    /// Default: 3 (8-way)
    pub children_log2: u32,

    /// Number of independent root shards
    ///
    /// Shards bound contention and are the unit of parallel sweeping.
    /// Must be a power of two.
    /// Default: 16
    pub root_size: usize,

    /// Slot-barrier mode
    ///
    /// Selects which sweep API set the table supports.
    /// Default: NeedSlotBarrier
    pub barrier_mode: BarrierMode,

    /// Worker threads for the default sweep pool
    ///
    /// If None, `SweepThreadPool::from_config` picks `min(4, num_cpus / 2)`,
    /// at least one.
    /// Default: None (auto-detect)
    pub sweep_threads: Option<usize>,

    /// Log sweep generations at info level
    ///
    /// Default: false
    pub verbose: bool,

    /// Render recorded table events as JSON
    ///
    /// Default: false
    pub json_events: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            children_log2: DEFAULT_CHILDREN_LOG2,
            root_size: DEFAULT_ROOT_SIZE,
            barrier_mode: BarrierMode::NeedSlotBarrier,
            sweep_threads: None,
            verbose: false,
            json_events: false,
        }
    }
}

impl TableConfig {
    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fintern::TableConfig;
    ///
    /// let config = TableConfig {
    ///     root_size: 12, // not a power of two
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.children_log2 == 0 || self.children_log2 > MAX_CHILDREN_LOG2 {
            return Err(ConfigError::InvalidBranching(format!(
                "children_log2 must be between 1 and {}, got {}",
                MAX_CHILDREN_LOG2, self.children_log2
            )));
        }

        if self.root_size == 0 || self.root_size > MAX_ROOT_SIZE {
            return Err(ConfigError::InvalidRootSize(format!(
                "root_size must be between 1 and {}, got {}",
                MAX_ROOT_SIZE, self.root_size
            )));
        }

        if !self.root_size.is_power_of_two() {
            return Err(ConfigError::InvalidRootSize(format!(
                "root_size must be a power of two, got {}",
                self.root_size
            )));
        }

        if let Some(threads) = self.sweep_threads {
            if threads == 0 {
                return Err(ConfigError::InvalidSweepThreads(
                    "sweep_threads must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with:
    /// - FINTERN_CHILDREN_LOG2
    /// - FINTERN_ROOT_SIZE
    /// - FINTERN_BARRIER (`need` or `none`)
    /// - FINTERN_SWEEP_THREADS
    /// - FINTERN_VERBOSE
    /// - FINTERN_JSON
    ///
    /// Unparseable values are ignored; call `validate` on the result.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FINTERN_CHILDREN_LOG2") {
            if let Ok(bits) = val.parse::<u32>() {
                config.children_log2 = bits;
            }
        }

        if let Ok(val) = std::env::var("FINTERN_ROOT_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.root_size = size;
            }
        }

        if let Ok(val) = std::env::var("FINTERN_BARRIER") {
            if let Some(mode) = parse_barrier_mode(&val) {
                config.barrier_mode = mode;
            }
        }

        if let Ok(val) = std::env::var("FINTERN_SWEEP_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                config.sweep_threads = Some(threads);
            }
        }

        if let Ok(val) = std::env::var("FINTERN_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("FINTERN_JSON") {
            config.json_events = parse_flag(&val);
        }

        config
    }

    /// Child slots per `Indirect` node
    pub fn children(&self) -> usize {
        1 << self.children_log2
    }

    /// Worker count for the default sweep pool, resolving auto-detect
    pub fn sweep_thread_count(&self) -> usize {
        self.sweep_threads
            .unwrap_or_else(|| (num_cpus::get() / 2).clamp(1, 4))
    }

    /// Deepest trie level that still has hash bits to consume
    pub fn max_levels(&self) -> u32 {
        HASH_BITS.div_ceil(self.children_log2)
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid branching factor: {0}")]
    InvalidBranching(String),

    #[error("Invalid root size: {0}")]
    InvalidRootSize(String),

    #[error("Invalid sweep threads: {0}")]
    InvalidSweepThreads(String),

    #[error("Barrier strategy mismatch: {0}")]
    BarrierMismatch(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

/// Width of the trie key
pub const HASH_BITS: u32 = u32::BITS;

const DEFAULT_CHILDREN_LOG2: u32 = 3;
const DEFAULT_ROOT_SIZE: usize = 16;
const MAX_CHILDREN_LOG2: u32 = 6;
const MAX_ROOT_SIZE: usize = 256;

fn parse_barrier_mode(val: &str) -> Option<BarrierMode> {
    match val.to_ascii_lowercase().as_str() {
        "need" | "need_slot_barrier" => Some(BarrierMode::NeedSlotBarrier),
        "none" | "no_slot_barrier" => Some(BarrierMode::NoSlotBarrier),
        _ => None,
    }
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}
