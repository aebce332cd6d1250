//! Metrics Module
//!
//! Prometheus counters and gauges for the connection table.

pub mod collector;

pub use collector::TableMetrics;
