//! Raw proxy preserving the path tail: `ANY /upstream/<modelId>/<rest...>` (§6).

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/upstream/{model_id}/{*rest}", any(proxy))
}

async fn proxy(
    State(state): State<AppState>,
    Path((model_id, rest)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let query = parts.uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let new_path_and_query = format!("/{rest}{query}");
    parts.uri = match new_path_and_query.parse() {
        Ok(uri) => uri,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let rebuilt = Request::from_parts(parts, body);

    let snapshot = hw_probe::probe(&hw_probe::ProbeOverrides::default());
    let avail = hw_probe::refresh_available(&snapshot);
    let fraction = if snapshot.total_ram_gb > 0.0 {
        avail.available_ram_gb / snapshot.total_ram_gb
    } else {
        1.0
    };

    match state.router().route(&model_id, rebuilt, || fraction).await {
        Ok(response) => response,
        Err(err) => (err.status_code(), err.to_string()).into_response(),
    }
}
