use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::cli::{GlobalArgs, ServeArgs};
use crate::config::AppConfig;
use crate::db::Database;
use crate::middleware::require_api_key;
use crate::routes;
use crate::services::download::ReqwestDownloadManager;
use crate::services::events::EventBus;
use crate::services::router::{Router as RequestRouter, RouterOptions};
use crate::state::AppState;

pub async fn execute(global: GlobalArgs, serve_args: ServeArgs) -> anyhow::Result<()> {
    let mut cfg = AppConfig::load_or_default()?;
    if !global.models_dirs.is_empty() {
        cfg.model_dirs = global.models_dirs.clone();
    }
    let api_key = global.api_key.clone().or_else(|| cfg.api_key.clone());

    let db = Database::open(&cfg.db_path())?;

    let runtime_path = cfg.runtime_config_path();
    let doc = load_or_generate_runtime_doc(&cfg, &runtime_path).await?;

    let events = EventBus::new();
    let download_manager: Arc<dyn crate::services::download::DownloadManager> =
        ReqwestDownloadManager::new(events.clone());

    let router_options = RouterOptions {
        min_free_memory_percent: cfg.min_free_memory_percent,
        max_ready_processes: serve_args.max_models,
        ..Default::default()
    };
    let request_router = RequestRouter::new(doc, download_manager.clone(), events.clone(), router_options);

    let state = AppState::new(cfg.clone(), db, request_router, download_manager, events, api_key);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::openai::router())
        .merge(routes::upstream::router())
        .merge(routes::management::router())
        .merge(routes::ws::router())
        .layer(from_fn_with_state(state.clone(), require_api_key))
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", global.host, global.port).parse()?;
    info!(%addr, "starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = shutdown_signal(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Read the runtime document if present, otherwise generate one from the
/// configured model directories on first run.
async fn load_or_generate_runtime_doc(
    cfg: &AppConfig,
    path: &std::path::Path,
) -> anyhow::Result<config_gen::RuntimeDocument> {
    if path.exists() {
        let text = std::fs::read_to_string(path)?;
        return Ok(serde_yaml::from_str(&text)?);
    }

    info!(path = %path.display(), "no runtime config found, generating one");
    if cfg.model_dirs.is_empty() {
        info!("no model directories configured; starting with an empty runtime document");
        return Ok(empty_runtime_doc(cfg));
    }

    let mut models = Vec::new();
    let mut projector_bindings = Vec::new();
    for dir in &cfg.model_dirs {
        let report = model_detector::scan_directory_bounded(
            dir,
            model_detector::DEFAULT_SCAN_CONCURRENCY,
        )
        .await?;
        models.extend(report.models);
        projector_bindings.extend(report.projector_bindings);
    }
    let scan = model_detector::ScanReport {
        models,
        projector_bindings,
        incomplete_splits: Vec::new(),
    };

    let snapshot = hw_probe::probe(&hw_probe::ProbeOverrides::default());
    let provision_options = binary_provisioner::ProvisionOptions {
        managed_dir: AppConfig::config_dir().join("bin"),
        ..Default::default()
    };
    let provision = binary_provisioner::provision(&snapshot, &provision_options).await?;

    let options = config_gen::GenerateOptions {
        binary_path: provision.executable_path.display().to_string(),
        min_free_memory_percent: cfg.min_free_memory_percent as u8,
        download_dir: cfg.download_dir.display().to_string(),
        planner: cfg.planner_options(),
        ..Default::default()
    };
    let (doc, errors) = config_gen::generate(&scan, &snapshot, &options);
    for err in &errors {
        tracing::warn!(path = %err.path.display(), reason = %err.reason, "skipped model during initial generation");
    }
    config_gen::write_to_file(&doc, &chrono::Utc::now(), path)?;
    Ok(doc)
}

fn empty_runtime_doc(cfg: &AppConfig) -> config_gen::RuntimeDocument {
    config_gen::RuntimeDocument {
        health_check_timeout: 30,
        log_level: "info".to_string(),
        start_port: 8100,
        download_dir: cfg.download_dir.display().to_string(),
        min_free_memory_percent: cfg.min_free_memory_percent as u8,
        macros: Default::default(),
        models: Default::default(),
        groups: Default::default(),
    }
}

async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining processes");
    state.router().shutdown_all().await;
}
