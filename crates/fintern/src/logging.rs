//! Table Logging and Tracing
//!
//! Sweep lifecycle events of an interning table, recorded for later inspection
//! and forwarded to the `log` facade.
//!
//! Log Levels:
//! - INFO: sweep generations starting and finishing
//! - DEBUG: pending, clean-up and clear
//! - TRACE: per-shard results

use crate::stats::SweepSummary;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for table events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Table event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableEvent {
    /// Sweep generation started
    SweepStarted {
        generation: u64,
        concurrent: bool,
        tasks: usize,
    },

    /// One shard swept
    ShardSwept {
        generation: u64,
        shard: usize,
        dead: u64,
        live: u64,
    },

    /// All shards swept, deferred entries waiting for the safepoint
    SweepPending { generation: u64, deferred: usize },

    /// Deferred entries handed to the epoch collector
    CleanedUp { generation: u64, released: usize },

    /// Sweep generation completed
    SweepFinished {
        generation: u64,
        duration_ms: f64,
        summary: SweepSummary,
    },

    /// Table cleared
    Cleared,
}

/// Table Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Forward events to the `log` facade
    pub console: bool,

    /// Render forwarded events as JSON
    pub json: bool,

    /// Prefix forwarded events with a wall-clock timestamp
    pub timestamps: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            json: false,
            timestamps: false,
        }
    }
}

impl LoggerConfig {
    /// Logger settings for a table configuration
    pub fn from_table(config: &crate::config::TableConfig) -> Self {
        Self {
            level: if config.verbose {
                LogLevel::Trace
            } else {
                LogLevel::Info
            },
            json: config.json_events,
            ..Default::default()
        }
    }
}

/// Table Logger - event recorder of one table
pub struct TableLogger {
    config: LoggerConfig,
    events: Mutex<Vec<(Instant, TableEvent)>>,
    enabled: AtomicBool,
}

impl TableLogger {
    /// Create new table logger
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a table event
    pub fn log(&self, event: TableEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = Self::event_level(&event);
        if level > self.config.level {
            return;
        }

        if self.config.console {
            self.output(level, &event);
        }
        self.events.lock().push((Instant::now(), event));
    }

    /// Get log level for event
    fn event_level(event: &TableEvent) -> LogLevel {
        match event {
            TableEvent::SweepStarted { .. } | TableEvent::SweepFinished { .. } => LogLevel::Info,
            TableEvent::SweepPending { .. }
            | TableEvent::CleanedUp { .. }
            | TableEvent::Cleared => LogLevel::Debug,
            TableEvent::ShardSwept { .. } => LogLevel::Trace,
        }
    }

    fn output(&self, level: LogLevel, event: &TableEvent) {
        let mut line = String::new();
        if self.config.timestamps {
            line.push_str(&format!(
                "[{}] ",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
            ));
        }

        if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => line.push_str(&json),
                Err(e) => {
                    log::warn!("failed to render table event: {}", e);
                    return;
                },
            }
        } else {
            line.push_str(&Self::human(event));
        }
        log::log!(level.to_log(), "{}", line);
    }

    /// Human-readable rendering
    fn human(event: &TableEvent) -> String {
        match event {
            TableEvent::SweepStarted {
                generation,
                concurrent,
                tasks,
            } => format!(
                "[Intern] Sweep {} started ({}, {} tasks)",
                generation,
                if *concurrent { "concurrent" } else { "stop-the-world" },
                tasks
            ),
            TableEvent::ShardSwept {
                generation,
                shard,
                dead,
                live,
            } => format!(
                "[Intern] Sweep {}: shard {} swept ({} dead, {} live)",
                generation, shard, dead, live
            ),
            TableEvent::SweepPending {
                generation,
                deferred,
            } => format!(
                "[Intern] Sweep {} pending, {} entries deferred",
                generation, deferred
            ),
            TableEvent::CleanedUp {
                generation,
                released,
            } => format!(
                "[Intern] Sweep {}: released {} entries",
                generation, released
            ),
            TableEvent::SweepFinished {
                generation,
                duration_ms,
                summary,
            } => format!(
                "[Intern] Sweep {} completed ({:.2}ms, {} dead, {} live, {} relocated)",
                generation, duration_ms, summary.dead, summary.live, summary.relocated
            ),
            TableEvent::Cleared => "[Intern] Table cleared".to_string(),
        }
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<TableEvent> {
        self.events
            .lock()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    /// Clear events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }
}

impl Default for TableLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl std::fmt::Debug for TableLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLogger")
            .field("config", &self.config)
            .field("events", &self.event_count())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
