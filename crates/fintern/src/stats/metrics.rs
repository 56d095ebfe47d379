//! Table Metrics - Export Metrics
//!
//! Exports table statistics to monitoring systems (Prometheus text format or JSON).

use super::StatsSnapshot;
use indexmap::IndexMap;

/// TableMetrics - metrics exporter
///
/// Keeps insertion order so exported series are stable between scrapes.
#[derive(Debug, Default, Clone)]
pub struct TableMetrics {
    metrics: IndexMap<String, MetricValue>,
}

impl TableMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard series from a stats snapshot
    pub fn from_snapshot(snapshot: &StatsSnapshot, entries: usize, deferred: usize) -> Self {
        let mut metrics = Self::new();
        metrics.add("fintern_lookups_total", MetricValue::Counter(snapshot.lookups));
        metrics.add("fintern_hits_total", MetricValue::Counter(snapshot.hits));
        metrics.add("fintern_inserts_total", MetricValue::Counter(snapshot.inserts));
        metrics.add(
            "fintern_cas_retries_total",
            MetricValue::Counter(snapshot.cas_retries),
        );
        metrics.add(
            "fintern_expansions_total",
            MetricValue::Counter(snapshot.expansions),
        );
        metrics.add(
            "fintern_pruned_heads_total",
            MetricValue::Counter(snapshot.pruned_heads),
        );
        metrics.add(
            "fintern_swept_dead_total",
            MetricValue::Counter(snapshot.swept_dead),
        );
        metrics.add("fintern_freed_total", MetricValue::Counter(snapshot.freed));
        metrics.add("fintern_sweeps_total", MetricValue::Counter(snapshot.sweeps));
        metrics.add("fintern_hit_ratio", MetricValue::Gauge(snapshot.hit_ratio()));
        metrics.add("fintern_entries", MetricValue::Gauge(entries as f64));
        metrics.add("fintern_deferred_entries", MetricValue::Gauge(deferred as f64));
        metrics
    }

    /// Add metric
    pub fn add(&mut self, name: impl Into<String>, value: MetricValue) {
        self.metrics.insert(name.into(), value);
    }

    /// Get metric
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    /// Export to Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for (name, value) in &self.metrics {
            output.push_str(&format!("{} {}\n", name, value.as_f64()));
        }
        output
    }

    /// Export to JSON
    pub fn to_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .metrics
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::json!(value.as_f64())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}

/// Metric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
        }
    }
}
