//! Liveness/readiness endpoints: cheap, never touch the lock-heavy
//! gate/validation paths.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn readiness(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tasks = state.stores.tasks.list().await.len();
    let runs = state.stores.runs.list().await.len();
    let pending_validations = state.stores.all_pending_validations().await.len();
    Json(json!({
        "status": "ready",
        "tasks": tasks,
        "runs": runs,
        "pending_validations": pending_validations,
        "worker_pool_size": state.worker_pool_size,
    }))
}
