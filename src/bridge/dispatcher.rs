use std::sync::Arc;

use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};

use crate::{
    db::{Database, Reading},
    hub::{BroadcastReport, Hub},
    metrics::MetricsCollector,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Store writes allowed in flight before new readings skip persistence.
pub const MAX_PENDING_WRITES: usize = 256;

/// Sole consumer of the reading queue. Persists and fans out every reading.
#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    hub: Hub,
    metrics: MetricsCollector,
    pending_writes: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(db: Database, hub: Hub, metrics: MetricsCollector) -> Self {
        Self::with_write_limit(db, hub, metrics, MAX_PENDING_WRITES)
    }

    pub fn with_write_limit(
        db: Database,
        hub: Hub,
        metrics: MetricsCollector,
        max_pending_writes: usize,
    ) -> Self {
        Self {
            db,
            hub,
            metrics,
            pending_writes: Arc::new(Semaphore::new(max_pending_writes)),
        }
    }

    /// Queues the store write on its own task, then broadcasts inline so the
    /// per-session order follows queue order.
    pub async fn dispatch(&self, reading: Reading) -> BroadcastReport {
        self.metrics.record_received();
        self.spawn_store_write(reading.clone());

        match self.hub.broadcast(&reading) {
            Ok(report) => {
                if report.dropped > 0 {
                    log_info!("dropped {} unreachable viewer session(s)", report.dropped);
                }
                self.metrics.record_broadcast(report);
                report
            }
            Err(err) => {
                log_error!("broadcast of reading {} failed: {err:?}", reading.timestamp);
                BroadcastReport::default()
            }
        }
    }

    fn spawn_store_write(&self, reading: Reading) {
        // A stalled store must not grow an unbounded backlog of write tasks.
        let Ok(permit) = Arc::clone(&self.pending_writes).try_acquire_owned() else {
            log_warn!("store backlog full; not persisting reading {}", reading.timestamp);
            self.metrics
                .record_store_failure("store backlog full".to_string());
            return;
        };

        let db = self.db.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match db.insert_reading(&reading).await {
                Ok(id) => {
                    log_debug!("stored reading {id} ({})", reading.timestamp);
                    metrics.record_stored();
                }
                Err(err) => {
                    log_error!("dropping reading {}: {err:?}", reading.timestamp);
                    metrics.record_store_failure(format!("{err:#}"));
                }
            }
        });
    }
}

/// Drains `queue` until every sender is gone.
pub async fn dispatch_loop(mut queue: mpsc::Receiver<Reading>, dispatcher: Dispatcher) {
    while let Some(reading) = queue.recv().await {
        dispatcher.dispatch(reading).await;
    }
    log_info!("reading queue closed; dispatcher exiting");
}

pub fn spawn_dispatcher(queue: mpsc::Receiver<Reading>, dispatcher: Dispatcher) -> JoinHandle<()> {
    tokio::spawn(dispatch_loop(queue, dispatcher))
}
