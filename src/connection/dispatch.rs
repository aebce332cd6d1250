//! Event fan-out to worker tasks
//!
//! Each context always maps to the same worker, so an `Opened` event is
//! applied before the `Closed` event that follows it. Different contexts land
//! on different workers and hit the table concurrently.

use super::event::ConnectionEvent;
use super::manager::ConnectionTracker;
use crate::record::ConnectionContext;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct EventDispatcher {
    senders: Vec<mpsc::Sender<ConnectionEvent>>,
    workers: Vec<JoinHandle<u64>>,
}

impl EventDispatcher {
    /// Spawn `workers` tasks applying events to `tracker`
    pub fn start(tracker: Arc<ConnectionTracker>, workers: usize, channel_capacity: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<ConnectionEvent>(channel_capacity.max(1));
            let tracker = Arc::clone(&tracker);

            handles.push(tokio::spawn(async move {
                let mut applied = 0u64;
                while let Some(event) = rx.recv().await {
                    tracker.handle(event);
                    applied += 1;
                }
                debug!(worker_id, applied, "Event worker finished");
                applied
            }));
            senders.push(tx);
        }

        info!("Started {} event workers", workers);
        Self {
            senders,
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Worker index handling `context`
    pub fn worker_for(&self, context: ConnectionContext) -> usize {
        let raw = context.raw();
        ((raw ^ (raw >> 32)) % self.senders.len() as u64) as usize
    }

    /// Queue an event, waiting while the worker's queue is full
    pub async fn dispatch(&self, event: ConnectionEvent) -> Result<()> {
        let worker = self.worker_for(event.context());
        self.senders[worker]
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("Event worker {} has stopped", worker))
    }

    /// Close all queues and wait for the workers to drain them.
    ///
    /// Returns the number of events applied.
    pub async fn finish(self) -> Result<u64> {
        drop(self.senders);

        let mut total = 0;
        for handle in self.workers {
            total += handle.await?;
        }
        Ok(total)
    }
}
