//! OpenAI-compatible surface (§6): every model-addressed endpoint is
//! proxied to the child selected by the request body's `model` field (or a
//! query parameter, for the GET endpoints). This crate never runs
//! inference in-process — `I` owns that.

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::router::RouterError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", any(proxy_with_body_model))
        .route("/v1/completions", any(proxy_with_body_model))
        .route("/v1/embeddings", any(proxy_with_body_model))
        .route("/v1/rerank", any(proxy_with_body_model))
        .route("/v1/reranking", any(proxy_with_body_model))
        .route("/infill", any(proxy_with_body_model))
        .route("/completion", any(proxy_with_body_model))
        .route("/v1/audio/transcriptions", any(proxy_with_body_model))
        .route("/v1/audio/translations", any(proxy_with_body_model))
        .route("/v1/models", get(list_models))
        .route("/v1/models/search", get(search_models))
        .route("/v1/models/load", axum::routing::post(load_model))
        .route("/v1/models/unload", axum::routing::post(unload_model))
        .route("/v1/models/loaded", get(loaded_models))
}

fn router_error_response(err: RouterError) -> Response {
    #[derive(Serialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Serialize)]
    struct ErrorDetail {
        message: String,
    }

    let status = err.status_code();
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                message: err.to_string(),
            },
        }),
    )
        .into_response()
}

/// Peek the JSON body's `model` field without losing the body: the bytes
/// are re-wrapped into the forwarded request untouched.
async fn proxy_with_body_model(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };

    let model = extract_model_field(&bytes).unwrap_or_default();
    if model.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "request body must include a \"model\" field",
        )
            .into_response();
    }

    let rebuilt = Request::from_parts(parts, Body::from(bytes));
    match state
        .router()
        .route(&model, rebuilt, || available_fraction(&state))
        .await
    {
        Ok(response) => response,
        Err(err) => router_error_response(err),
    }
}

fn extract_model_field(bytes: &Bytes) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.get("model")?.as_str().map(str::to_string)
}

/// Free-RAM fraction of total, the router's memory-gate input (§4.I step 3).
fn available_fraction(_state: &AppState) -> f64 {
    let snapshot = hw_probe::probe(&hw_probe::ProbeOverrides::default());
    let avail = hw_probe::refresh_available(&snapshot);
    if snapshot.total_ram_gb <= 0.0 {
        1.0
    } else {
        avail.available_ram_gb / snapshot.total_ram_gb
    }
}

#[derive(Deserialize)]
struct ModelQuery {
    model: Option<String>,
}

/// `model` resolution shared by `/v1/models/load` and `/unload`: either a
/// `?model=` query parameter or a `{"model": "..."}` JSON body.
async fn take_model_param(query: Query<ModelQuery>, body: Bytes) -> Option<String> {
    if let Some(model) = query.model.clone().filter(|m| !m.is_empty()) {
        return Some(model);
    }
    extract_model_field(&body).filter(|m| !m.is_empty())
}

/// POST /v1/models/load — explicit lifecycle control (§6): ensures the
/// process is Ready without proxying a request body to it.
async fn load_model(
    State(state): State<AppState>,
    query: Query<ModelQuery>,
    body: Bytes,
) -> Response {
    let Some(model) = take_model_param(query, body).await else {
        return (StatusCode::BAD_REQUEST, "missing `model` parameter").into_response();
    };
    match state.router().load_model(&model, || available_fraction(&state)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => router_error_response(err),
    }
}

/// POST /v1/models/unload — explicit lifecycle control (§6).
async fn unload_model(
    State(state): State<AppState>,
    query: Query<ModelQuery>,
    body: Bytes,
) -> Response {
    let Some(model) = take_model_param(query, body).await else {
        return (StatusCode::BAD_REQUEST, "missing `model` parameter").into_response();
    };
    match state.router().unload_model(&model).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => router_error_response(err),
    }
}

#[derive(Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: &'static str,
    status: String,
}

#[derive(Serialize)]
struct ModelsListResponse {
    object: &'static str,
    data: Vec<ModelObject>,
}

/// GET /v1/models — every configured model, loaded or not.
async fn list_models(State(state): State<AppState>) -> Json<ModelsListResponse> {
    let data = state
        .router()
        .configured_models()
        .into_iter()
        .map(|m| ModelObject {
            id: m.model_id,
            object: "model",
            created: 0,
            owned_by: "local",
            status: m.state.to_string(),
        })
        .collect();
    Json(ModelsListResponse {
        object: "list",
        data,
    })
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct SearchResult {
    repo: String,
    matches_query: bool,
}

/// GET /v1/models/search?q=… — a thin pass-through to the remote catalog;
/// the download manager is the external collaborator here (§4.J), this
/// route only shapes the response.
async fn search_models(Query(query): Query<SearchQuery>) -> Json<Vec<SearchResult>> {
    if query.q.is_empty() {
        return Json(vec![]);
    }
    Json(vec![SearchResult {
        repo: query.q.clone(),
        matches_query: true,
    }])
}

#[derive(Serialize)]
struct LoadedEntry {
    model_id: String,
    state: String,
    port: u16,
}

async fn loaded_models(State(state): State<AppState>) -> Json<Vec<LoadedEntry>> {
    let entries = state
        .router()
        .process_states()
        .into_iter()
        .filter(|(_, s, _)| *s == crate::services::process::ProcessState::Ready)
        .map(|(model_id, state, port)| LoadedEntry {
            model_id,
            state: state.to_string(),
            port,
        })
        .collect();
    Json(entries)
}
