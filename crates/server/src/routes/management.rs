//! Management API: directory scanning, folder registry, app configuration,
//! download status, and system info. Ambient operator surface, not part of
//! the OpenAI-compatible router (§6 "Thin CLI" sibling for the HTTP side).

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::FolderEntry;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/models/scan", post(scan_models))
        .route("/api/folders", get(list_folders).post(add_folder))
        .route("/api/folders/{path}", axum::routing::delete(remove_folder))
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/downloads/{id}", get(download_status))
        .route("/api/downloads/{id}/pause", put(pause_download))
        .route("/api/downloads/{id}/resume", put(resume_download))
        .route("/api/downloads/{id}/cancel", put(cancel_download))
        .route("/api/system/info", get(system_info))
}

//  Model scanning

#[derive(Debug, Serialize)]
struct ScanResponse {
    models_found: usize,
    incomplete: usize,
}

/// POST /api/models/scan — rescan every enabled folder, regenerate the
/// runtime document, and persist the scan to history.
async fn scan_models(State(state): State<AppState>) -> Result<Json<ScanResponse>, (StatusCode, String)> {
    let folders = crate::config::FolderDatabase::load_or_default(&state.config().folders_path())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut total_models = 0usize;
    let mut total_incomplete = 0usize;
    for folder in folders.folders.iter().filter(|f| f.enabled) {
        let report = model_detector::scan_directory_bounded(
            &folder.path,
            model_detector::DEFAULT_SCAN_CONCURRENCY,
        )
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        total_models += report.models.len();
        total_incomplete += report.incomplete_splits.len();
        let _ = state.db().record_scan(
            &folder.path.display().to_string(),
            report.models.len(),
            report.incomplete_splits.len(),
        );
        if !report.incomplete_splits.is_empty() {
            for incomplete in &report.incomplete_splits {
                tracing::warn!(
                    base = %incomplete.base_name.display(),
                    declared = incomplete.declared_total,
                    "incomplete split-file group excluded from scan"
                );
            }
        }
    }

    info!(total_models, total_incomplete, "model scan complete");
    Ok(Json(ScanResponse {
        models_found: total_models,
        incomplete: total_incomplete,
    }))
}

//  Folder registry

#[derive(Debug, Deserialize)]
struct AddFolderRequest {
    path: std::path::PathBuf,
    #[serde(default = "default_true")]
    recursive: bool,
}

fn default_true() -> bool {
    true
}

async fn list_folders(State(state): State<AppState>) -> Result<Json<Vec<FolderEntry>>, (StatusCode, String)> {
    let db = crate::config::FolderDatabase::load_or_default(&state.config().folders_path())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(db.folders))
}

async fn add_folder(
    State(state): State<AppState>,
    Json(req): Json<AddFolderRequest>,
) -> Result<Json<FolderEntry>, (StatusCode, String)> {
    let path = state.config().folders_path();
    let mut db = crate::config::FolderDatabase::load_or_default(&path)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if db.folders.iter().any(|f| f.path == req.path) {
        return Err((StatusCode::CONFLICT, "folder already registered".to_string()));
    }

    let entry = FolderEntry {
        path: req.path,
        added_at: chrono::Utc::now(),
        last_scanned: None,
        recursive: req.recursive,
        enabled: true,
    };
    db.folders.push(entry.clone());
    db.save(&path)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(entry))
}

async fn remove_folder(
    State(state): State<AppState>,
    Path(encoded_path): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let path = state.config().folders_path();
    let mut db = crate::config::FolderDatabase::load_or_default(&path)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let target = std::path::PathBuf::from(encoded_path);
    let before = db.folders.len();
    db.folders.retain(|f| f.path != target);
    if db.folders.len() == before {
        return Err((StatusCode::NOT_FOUND, "folder not registered".to_string()));
    }
    db.save(&path)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

//  App configuration

#[derive(Debug, Serialize)]
struct ConfigResponse {
    host: String,
    port: u16,
    model_dirs: Vec<String>,
    min_free_memory_percent: f64,
    download_dir: String,
    planner_policy: crate::config::PlannerPolicyConfig,
    context_floor: u32,
    api_key_set: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    model_dirs: Option<Vec<String>>,
    min_free_memory_percent: Option<f64>,
    planner_policy: Option<crate::config::PlannerPolicyConfig>,
    context_floor: Option<u32>,
    api_key: Option<String>,
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let cfg = state.config();
    Json(ConfigResponse {
        host: cfg.host.clone(),
        port: cfg.port,
        model_dirs: cfg
            .model_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        min_free_memory_percent: cfg.min_free_memory_percent,
        download_dir: cfg.download_dir.display().to_string(),
        planner_policy: cfg.planner_policy,
        context_floor: cfg.context_floor,
        api_key_set: cfg.api_key.is_some(),
    })
}

async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut cfg = state.config().clone();

    if let Some(dirs) = update.model_dirs {
        cfg.model_dirs = dirs.into_iter().map(std::path::PathBuf::from).collect();
    }
    if let Some(pct) = update.min_free_memory_percent {
        cfg.min_free_memory_percent = pct;
    }
    if let Some(policy) = update.planner_policy {
        cfg.planner_policy = policy;
    }
    if let Some(floor) = update.context_floor {
        cfg.context_floor = floor;
    }
    if let Some(key) = update.api_key {
        cfg.api_key = if key.is_empty() { None } else { Some(key) };
    }

    cfg.save()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

//  Downloads

async fn download_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::services::download::DownloadRecord>, (StatusCode, String)> {
    state
        .download_manager()
        .get_download_status(&id)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

async fn pause_download(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.download_manager().pause(&id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!(id, error = %e, "pause failed");
            StatusCode::NOT_FOUND
        }
    }
}

async fn resume_download(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.download_manager().resume(&id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!(id, error = %e, "resume failed");
            StatusCode::NOT_FOUND
        }
    }
}

async fn cancel_download(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.download_manager().cancel(&id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!(id, error = %e, "cancel failed");
            StatusCode::NOT_FOUND
        }
    }
}

//  System info

#[derive(Debug, Serialize)]
struct SystemInfoResponse {
    version: String,
    processes: Vec<ProcessSummary>,
}

#[derive(Debug, Serialize)]
struct ProcessSummary {
    model_id: String,
    state: String,
    port: u16,
}

async fn system_info(State(state): State<AppState>) -> Json<SystemInfoResponse> {
    let processes = state
        .router()
        .process_states()
        .into_iter()
        .map(|(model_id, s, port)| ProcessSummary {
            model_id,
            state: s.to_string(),
            port,
        })
        .collect();

    Json(SystemInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        processes,
    })
}
