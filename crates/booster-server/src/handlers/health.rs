//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Map, Value};

use crate::state::AppState;

/// Handle health check requests. Reports per-pod utilization and per-model
/// load state.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let mut pods = Map::new();
    for (id, stats) in state.scheduler.pod_stats() {
        pods.insert(
            id,
            json!({
                "queued": stats.queued,
                "running": stats.running,
                "threads": stats.threads,
                "batch": stats.batch,
            }),
        );
    }

    let mut models = Map::new();
    for (id, load_state) in state.registry.states() {
        models.insert(id, Value::String(load_state.as_str().to_string()));
    }

    Json(json!({
        "status": "ok",
        "id": state.server_id,
        "pods": pods,
        "models": models,
    }))
}
