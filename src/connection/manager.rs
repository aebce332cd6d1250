//! Connection Tracker Implementation

use super::event::ConnectionEvent;
use crate::config::TrackerConfig;
use crate::metrics::TableMetrics;
use crate::record::{ConnectionContext, ProcessRecord};
use crate::table::{ConnectionTable, InsertOutcome, TableError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What applying one event did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Inserted,
    /// An open reused a tracked context; holds the overwritten record
    Replaced(ProcessRecord),
    /// A close removed this record
    Removed(ProcessRecord),
    /// A close named a context that was not tracked
    Untracked,
    /// An open was dropped because the table was full
    Dropped,
}

/// Live connection as reported to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedConnection {
    pub context: ConnectionContext,
    #[serde(flatten)]
    pub record: ProcessRecord,
}

/// Tracker counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub opened: u64,
    pub replaced: u64,
    pub closed: u64,
    pub untracked_closes: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub live_entries: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicU64,
    replaced: AtomicU64,
    closed: AtomicU64,
    untracked_closes: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

/// Applies connection events to a shared `ConnectionTable`.
///
/// Table failures never propagate: a full table turns an open into a counted
/// drop, and closing an unknown context is counted as untracked.
pub struct ConnectionTracker {
    table: Arc<ConnectionTable>,
    config: TrackerConfig,
    metrics: Option<Arc<TableMetrics>>,
    counters: Counters,
}

impl ConnectionTracker {
    pub fn new(table: Arc<ConnectionTable>, config: TrackerConfig) -> Self {
        Self {
            table,
            config,
            metrics: None,
            counters: Counters::default(),
        }
    }

    /// Mirror counters into prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<TableMetrics>) -> Self {
        metrics.capacity.set(self.table.capacity() as i64);
        self.metrics = Some(metrics);
        self.refresh_gauges();
        self
    }

    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    pub fn metrics(&self) -> Option<&Arc<TableMetrics>> {
        self.metrics.as_ref()
    }

    /// Apply one event
    pub fn handle(&self, event: ConnectionEvent) -> EventOutcome {
        let context = event.context();
        match event.record() {
            Some(record) => self.open(context, record),
            None => self.close(context),
        }
    }

    /// Track a connection opened by `record`'s process
    pub fn open(&self, context: ConnectionContext, record: ProcessRecord) -> EventOutcome {
        let outcome = match self.table.insert_or_replace(context, record) {
            Ok(InsertOutcome::Inserted) => {
                self.counters.opened.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.inserts_total.inc();
                }
                debug!(
                    context = %context,
                    pid = record.pid,
                    uid = record.uid,
                    comm = %record.comm,
                    "Tracking connection"
                );
                EventOutcome::Inserted
            }
            Ok(InsertOutcome::Replaced(previous)) => {
                self.counters.opened.fetch_add(1, Ordering::Relaxed);
                self.counters.replaced.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.replacements_total.inc();
                }
                debug!(
                    context = %context,
                    pid = record.pid,
                    previous_pid = previous.pid,
                    "Replaced tracked connection"
                );
                EventOutcome::Replaced(previous)
            }
            Err(TableError::CapacityExceeded { capacity }) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.dropped_events_total.inc();
                }
                if self.config.log_dropped_events {
                    warn!(
                        context = %context,
                        pid = record.pid,
                        capacity,
                        "Connection table full, dropping open event"
                    );
                }
                EventOutcome::Dropped
            }
        };
        outcome
    }

    /// Stop tracking `context`
    pub fn close(&self, context: ConnectionContext) -> EventOutcome {
        let outcome = match self.table.remove(context) {
            Some(record) => {
                self.counters.closed.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.removals_total.inc();
                }
                debug!(context = %context, pid = record.pid, "Connection closed");
                EventOutcome::Removed(record)
            }
            None => {
                self.counters.untracked_closes.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.untracked_closes_total.inc();
                }
                if self.config.log_untracked_closes {
                    debug!(context = %context, "Close for untracked connection");
                }
                EventOutcome::Untracked
            }
        };
        outcome
    }

    /// Count an input line that could not be decoded
    pub fn record_malformed(&self) {
        self.counters.malformed.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.malformed_events_total.inc();
        }
    }

    pub fn lookup(&self, context: ConnectionContext) -> Option<ProcessRecord> {
        self.table.lookup(context)
    }

    /// All live connections ordered by context
    pub fn snapshot(&self) -> Vec<TrackedConnection> {
        let mut connections: Vec<_> = self
            .table
            .iter()
            .map(|(context, record)| TrackedConnection { context, record })
            .collect();
        connections.sort_by_key(|conn| conn.context);
        connections
    }

    /// Live connections opened by process `pid`, ordered by context
    pub fn connections_for_pid(&self, pid: u32) -> Vec<TrackedConnection> {
        let mut connections: Vec<_> = self
            .table
            .iter()
            .filter(|(_, record)| record.pid == pid)
            .map(|(context, record)| TrackedConnection { context, record })
            .collect();
        connections.sort_by_key(|conn| conn.context);
        connections
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            opened: self.counters.opened.load(Ordering::Relaxed),
            replaced: self.counters.replaced.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
            untracked_closes: self.counters.untracked_closes.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            live_entries: self.table.len(),
            capacity: self.table.capacity(),
        }
    }

    /// Periodically log tracker statistics until shutdown is signalled
    pub fn start_report_task(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh_gauges();
                        let stats = self.stats();
                        info!(
                            live = stats.live_entries,
                            capacity = stats.capacity,
                            opened = stats.opened,
                            closed = stats.closed,
                            dropped = stats.dropped,
                            untracked = stats.untracked_closes,
                            "Connection table status"
                        );
                    }
                    _ = shutdown.recv() => {
                        debug!("Report task received shutdown signal");
                        break;
                    }
                }
            }
        });

        info!("Started connection table report task");
        handle
    }

    /// Prometheus text with gauges read from the table at call time
    pub fn export_metrics(&self) -> Option<String> {
        self.refresh_gauges();
        self.metrics.as_ref().map(|metrics| metrics.export_prometheus())
    }

    /// Gauges are sampled here rather than on every event, since workers
    /// finishing out of order would otherwise leave a stale value behind
    fn refresh_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.entries.set(self.table.len() as i64);
        }
    }
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("table", &self.table)
            .field("counters", &self.counters)
            .finish()
    }
}
