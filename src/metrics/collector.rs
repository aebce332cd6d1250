//! Metrics Collector

use crate::Result;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use tracing::error;

/// Prometheus metrics for the connection table and the tracker feeding it
pub struct TableMetrics {
    registry: Registry,

    pub entries: IntGauge,
    pub capacity: IntGauge,
    pub inserts_total: IntCounter,
    pub replacements_total: IntCounter,
    pub removals_total: IntCounter,
    pub untracked_closes_total: IntCounter,
    pub dropped_events_total: IntCounter,
    pub malformed_events_total: IntCounter,
}

impl TableMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let entries = IntGauge::new(
            "proctrack_table_entries",
            "Number of live entries in the connection table",
        )?;
        let capacity = IntGauge::new(
            "proctrack_table_capacity",
            "Maximum number of entries the connection table can hold",
        )?;
        let inserts_total = IntCounter::new(
            "proctrack_inserts_total",
            "Connections inserted under a new context",
        )?;
        let replacements_total = IntCounter::new(
            "proctrack_replacements_total",
            "Opened events that overwrote an existing context",
        )?;
        let removals_total = IntCounter::new(
            "proctrack_removals_total",
            "Tracked connections removed on close",
        )?;
        let untracked_closes_total = IntCounter::new(
            "proctrack_untracked_closes_total",
            "Closed events for contexts that were not tracked",
        )?;
        let dropped_events_total = IntCounter::new(
            "proctrack_dropped_events_total",
            "Opened events dropped because the table was full",
        )?;
        let malformed_events_total = IntCounter::new(
            "proctrack_malformed_events_total",
            "Input lines that could not be decoded as events",
        )?;

        registry.register(Box::new(entries.clone()))?;
        registry.register(Box::new(capacity.clone()))?;
        registry.register(Box::new(inserts_total.clone()))?;
        registry.register(Box::new(replacements_total.clone()))?;
        registry.register(Box::new(removals_total.clone()))?;
        registry.register(Box::new(untracked_closes_total.clone()))?;
        registry.register(Box::new(dropped_events_total.clone()))?;
        registry.register(Box::new(malformed_events_total.clone()))?;

        Ok(Self {
            registry,
            entries,
            capacity,
            inserts_total,
            replacements_total,
            removals_total,
            untracked_closes_total,
            dropped_events_total,
            malformed_events_total,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

impl std::fmt::Debug for TableMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMetrics")
            .field("entries", &self.entries.get())
            .field("capacity", &self.capacity.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_all_families() {
        let metrics = TableMetrics::new().unwrap();
        metrics.capacity.set(100);
        metrics.inserts_total.inc();
        metrics.dropped_events_total.inc_by(3);

        let text = metrics.export_prometheus();
        assert!(text.contains("proctrack_table_capacity 100"));
        assert!(text.contains("proctrack_inserts_total 1"));
        assert!(text.contains("proctrack_dropped_events_total 3"));
        assert!(text.contains("proctrack_malformed_events_total 0"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = TableMetrics::new().unwrap();
        let b = TableMetrics::new().unwrap();
        a.removals_total.inc();
        assert_eq!(a.removals_total.get(), 1);
        assert_eq!(b.removals_total.get(), 0);
    }
}
