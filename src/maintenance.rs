use anyhow::{bail, Context, Result};
use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{db::Database, metrics::MetricsCollector};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Runs one retention sweep and records the outcome.
pub async fn run_sweep(
    db: &Database,
    retention: Duration,
    metrics: &MetricsCollector,
) -> Result<usize> {
    match db.evict_older_than(retention).await {
        Ok(removed) => {
            if removed > 0 {
                log_info!("history cleaner removed {removed} old readings");
            }
            metrics.record_eviction(removed);
            Ok(removed)
        }
        Err(err) => {
            metrics.record_maintenance_failure();
            Err(err)
        }
    }
}

/// Sweeps on a fixed timer, independent of how fast readings arrive.
pub async fn maintenance_loop(
    db: Database,
    retention: Duration,
    every: Duration,
    metrics: MetricsCollector,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_sweep(&db, retention, &metrics).await {
                    log_error!("retention sweep failed: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("maintenance loop shutting down");
                break;
            }
        }
    }
}

pub struct MaintenanceController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl MaintenanceController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(
        &mut self,
        db: Database,
        retention: Duration,
        every: Duration,
        metrics: MetricsCollector,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("maintenance already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(maintenance_loop(
            db,
            retention,
            every,
            metrics,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("maintenance task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for MaintenanceController {
    fn default() -> Self {
        Self::new()
    }
}
