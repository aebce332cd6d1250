//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT, broadcasts the shutdown to background
//! tasks, and drains queued events before the table is reported.

use crate::connection::EventDispatcher;
use crate::Result;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Upper bound for draining queued events
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast shutdown without waiting for a signal
    pub fn trigger(&self) {
        // No receivers simply means nothing is listening any more
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for SIGTERM or SIGINT, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Close the dispatcher and wait for workers to apply queued events.
    ///
    /// Returns the number of events applied, or `None` if the timeout hit
    /// first.
    pub async fn drain_dispatcher(&self, dispatcher: EventDispatcher) -> Result<Option<u64>> {
        let start_time = Instant::now();
        info!(
            "Draining {} event workers (timeout: {:?})",
            dispatcher.worker_count(),
            self.timeout
        );

        match tokio::time::timeout(self.timeout, dispatcher.finish()).await {
            Ok(applied) => {
                let applied = applied?;
                info!(
                    "Applied {} events, workers drained in {:?}",
                    applied,
                    start_time.elapsed()
                );
                Ok(Some(applied))
            }
            Err(_) => {
                warn!(
                    "Shutdown timeout reached after {:?} with events still queued",
                    start_time.elapsed()
                );
                Ok(None)
            }
        }
    }
}
