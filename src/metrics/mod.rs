mod types;

pub use types::{MetricsSnapshot, PipelineCounters, SystemMetrics};

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::hub::BroadcastReport;

/// Pipeline counters shared by the dispatcher, maintenance loop and HTTP API.
/// Store failures are counted here so they show up on `/api/health`, not only in logs.
///
/// Counters sit behind a short-lived lock that is never held across I/O; the
/// process probe has its own lock, so a `/proc` refresh never stalls the pipeline.
pub struct MetricsCollector {
    pipeline: Arc<Mutex<PipelineState>>,
    process: Arc<tokio::sync::Mutex<ProcessProbe>>,
}

#[derive(Default)]
struct PipelineState {
    counters: PipelineCounters,
    last_reading_at: Option<chrono::DateTime<Utc>>,
    last_store_error: Option<String>,
}

struct ProcessProbe {
    system: System,
    pid: Pid,
}

impl ProcessProbe {
    fn sample(&mut self) -> SystemMetrics {
        // Refresh to get current CPU/RAM
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));

        match self.system.process(self.pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            pipeline: Arc::new(Mutex::new(PipelineState::default())),
            process: Arc::new(tokio::sync::Mutex::new(ProcessProbe { system, pid })),
        }
    }

    fn pipeline(&self) -> MutexGuard<'_, PipelineState> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_received(&self) {
        let mut state = self.pipeline();
        state.counters.received += 1;
        state.last_reading_at = Some(Utc::now());
    }

    pub fn record_decode_failure(&self) {
        self.pipeline().counters.decode_failures += 1;
    }

    pub fn record_stored(&self) {
        self.pipeline().counters.stored += 1;
    }

    pub fn record_store_failure(&self, error: String) {
        let mut state = self.pipeline();
        state.counters.store_failures += 1;
        state.last_store_error = Some(error);
    }

    pub fn record_broadcast(&self, report: BroadcastReport) {
        let mut state = self.pipeline();
        state.counters.broadcasts += 1;
        state.counters.deliveries += report.delivered as u64;
        state.counters.dropped_sessions += report.dropped as u64;
    }

    pub fn record_eviction(&self, removed: usize) {
        self.pipeline().counters.evicted += removed as u64;
    }

    pub fn record_maintenance_failure(&self) {
        self.pipeline().counters.maintenance_failures += 1;
    }

    pub fn counters(&self) -> PipelineCounters {
        self.pipeline().counters.clone()
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let system = self.process.lock().await.sample();

        let state = self.pipeline();
        MetricsSnapshot {
            system,
            counters: state.counters.clone(),
            last_reading_at: state.last_reading_at,
            last_store_error: state.last_store_error.clone(),
        }
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            process: Arc::clone(&self.process),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
