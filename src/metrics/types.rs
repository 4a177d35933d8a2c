use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineCounters {
    pub received: u64,
    pub decode_failures: u64,
    pub stored: u64,
    pub store_failures: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub dropped_sessions: u64,
    pub evicted: u64,
    pub maintenance_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub counters: PipelineCounters,
    pub last_reading_at: Option<DateTime<Utc>>,
    pub last_store_error: Option<String>,
}
