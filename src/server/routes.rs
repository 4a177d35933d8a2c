use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    bridge::BridgeState,
    db::StoredReading,
    metrics::MetricsSnapshot,
    AppState,
};

const ENABLE_LOGS: bool = true;

use crate::log_error;

const DEFAULT_HISTORY_LIMIT: u64 = 100;
const MAX_HISTORY_LIMIT: u64 = 1_000;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusDescriptor {
    pub status: String,
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub bridge: BridgeState,
    pub sessions: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
}

/// GET / - fixed status descriptor
pub async fn status() -> Json<StatusDescriptor> {
    Json(StatusDescriptor {
        status: "Running".into(),
        mode: "MQTT Bridge Mode".into(),
    })
}

/// GET /api/health - bridge state, live sessions and pipeline counters
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let bridge = *state.bridge_state.borrow();
    Json(HealthReport {
        bridge,
        sessions: state.hub.session_count(),
        metrics: state.metrics.get_snapshot().await,
    })
}

/// GET /api/readings?limit=N - newest stored readings first
pub async fn recent_readings(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<StoredReading>>, (StatusCode, String)> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    state.db.latest_readings(limit).await.map(Json).map_err(|err| {
        log_error!("history query failed: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to load readings".to_string(),
        )
    })
}
