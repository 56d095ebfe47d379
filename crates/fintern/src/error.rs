//! Error Module - Interning Table Error Types
//!
//! Defines the recoverable errors of the table.
//!
//! # Error Categories
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid `TableConfig`
//! - `UnsupportedMode` - Operation not available for the table's slot-barrier mode
//!
//! ## Sweep Lifecycle Errors
//! - `InvalidState` - Sweep state machine driven out of order
//!
//! ## Worker Pool Errors
//! - `ThreadSpawn` - Worker thread could not be created
//! - `PoolClosed` - Task posted to a pool that has shut down
//!
//! Broken trie invariants are not errors: they are programmer errors inside the
//! runtime and abort through [`assert_context!`](crate::assert_context).

use crate::barrier::BarrierMode;
use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all table operations
///
/// # Examples
///
/// ```rust
/// use fintern::InternError;
///
/// fn handle_error(err: InternError) {
///     match err {
///         InternError::InvalidState { expected, actual } => {
///             eprintln!("sweep misuse: expected {}, got {}", expected, actual);
///         }
///         _ => eprintln!("other error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum InternError {
    /// Configuration error
    ///
    /// **When returned:** `TableConfig::validate` rejected the configuration, or the
    /// slot-barrier strategy does not match the configured mode.
    ///
    /// **Recovery strategy:** Fix the configuration, or fall back to the defaults
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid state
    ///
    /// **When returned:** The sweep state machine was driven out of order, e.g. a
    /// second sweep started before the previous one finished, or `clear` called
    /// while a sweep is in flight.
    ///
    /// **Recovery strategy:** Cannot recover - indicates a bug in the caller
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Operation not supported by the table's barrier mode
    ///
    /// **When returned:** Concurrent sweep requested on a `NoSlotBarrier` table
    #[error("{operation} is not supported in {mode:?} mode")]
    UnsupportedMode {
        operation: &'static str,
        mode: BarrierMode,
    },

    /// Worker thread spawn failed
    ///
    /// **When returned:** The OS refused to create a sweep worker thread
    ///
    /// **Recovery strategy:** Retry with fewer workers
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    /// Task pool closed
    ///
    /// **When returned:** A task was posted after the pool shut down
    #[error("Task pool is closed")]
    PoolClosed,
}

impl InternError {
    /// Check if this error indicates a bug in the calling code
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            InternError::InvalidState { .. } | InternError::UnsupportedMode { .. }
        )
    }

    pub(crate) fn invalid_state(expected: impl ToString, actual: impl ToString) -> Self {
        InternError::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type alias for table operations
pub type Result<T> = std::result::Result<T, InternError>;

/// Macro for assertion with context
///
/// Contract violations inside the trie abort instead of returning an error:
/// continuing past a broken invariant risks silent corruption.
#[macro_export]
macro_rules! assert_context {
    ($cond:expr, $context:expr) => {
        if !$cond {
            panic!("Assertion failed at {}: {}", stringify!($cond), $context);
        }
    };
    ($cond:expr, $context:expr, $($arg:tt)*) => {
        if !$cond {
            panic!("Assertion failed at {}: {}", stringify!($cond), format!($context, $($arg)*));
        }
    };
}
