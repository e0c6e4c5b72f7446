//! Static liveness and a running-process snapshot (§6).

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/running", get(running))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct RunningEntry {
    model_id: String,
    state: String,
    port: u16,
}

async fn running(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Vec<RunningEntry>> {
    let entries = state
        .router()
        .process_states()
        .into_iter()
        .filter(|(_, process_state, _)| {
            *process_state == crate::services::process::ProcessState::Ready
        })
        .map(|(model_id, process_state, port)| RunningEntry {
            model_id,
            state: process_state.to_string(),
            port,
        })
        .collect();
    Json(entries)
}
