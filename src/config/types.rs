//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub table: TableConfig,
    pub tracker: TrackerConfig,
    pub monitoring: MonitoringConfig,
}

/// Connection table sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TableConfig {
    /// Maximum number of live entries
    pub capacity: usize,
    /// Writer lock stripes, rounded up to a power of two
    pub stripes: usize,
}

/// Event handling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Worker tasks applying events; 0 means one per available core
    pub workers: usize,
    /// Bounded queue length per worker
    pub channel_capacity: usize,
    pub log_dropped_events: bool,
    pub log_untracked_closes: bool,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
    pub prometheus_enabled: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            stripes: 64,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            channel_capacity: 1024,
            log_dropped_events: true,
            log_untracked_closes: false,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            report_interval: Duration::from_secs(30),
            prometheus_enabled: true,
        }
    }
}

impl TrackerConfig {
    /// Worker count with `0` resolved to the number of available cores
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
