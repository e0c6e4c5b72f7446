//! Request router (§4.I): resolves a logical model id to a running
//! process, applying the memory gate and group policy, triggering an
//! auto-download on a `repo/name` miss, then proxying the HTTP request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tracing::{info, warn};

use config_gen::RuntimeDocument;

use crate::services::download::DownloadManager;
use crate::services::events::{Event, EventBus};
use crate::services::groups::{Group, GroupTable};
use crate::services::process::{Process, ProcessSpec, ProcessState, StopStrategy};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("out of memory: no further processes could be evicted")]
    OutOfMemory,
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("startup timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownModel(_) => StatusCode::NOT_FOUND,
            Self::OutOfMemory => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Mapping `modelId → {lastUsedAt, loadedAt, requestCount}`, the single
/// source of truth for LRU eviction ordering (§3, §9).
#[derive(Default)]
pub struct LoadTracker {
    entries: RwLock<HashMap<String, LoadEntry>>,
}

#[derive(Clone, Copy)]
struct LoadEntry {
    last_used_at: Instant,
    loaded_at: Instant,
    request_count: u64,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, model_id: &str) {
        let mut entries = self.entries.write().unwrap();
        let now = Instant::now();
        entries
            .entry(model_id.to_string())
            .and_modify(|e| {
                e.last_used_at = now;
                e.request_count += 1;
            })
            .or_insert(LoadEntry {
                last_used_at: now,
                loaded_at: now,
                request_count: 1,
            });
    }

    pub fn forget(&self, model_id: &str) {
        self.entries.write().unwrap().remove(model_id);
    }

    /// Model ids ordered least-recently-used first, excluding `model_id`.
    pub fn lru_order(&self, exclude: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        let mut ids: Vec<(String, Instant)> = entries
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(id, e)| (id.clone(), e.last_used_at))
            .collect();
        ids.sort_by_key(|(_, last_used)| *last_used);
        ids.into_iter().map(|(id, _)| id).collect()
    }
}

struct ConfigState {
    doc: RuntimeDocument,
    /// alias (including the canonical modelId itself) → modelId
    aliases: HashMap<String, String>,
}

fn build_alias_map(doc: &RuntimeDocument) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for (model_id, cfg) in &doc.models {
        aliases.insert(model_id.clone(), model_id.clone());
        for alias in &cfg.aliases {
            aliases.insert(alias.clone(), model_id.clone());
        }
    }
    aliases
}

/// A configured model's catalog entry plus its current (possibly never-
/// started) process state — the shape `GET /v1/models` returns (§6).
pub struct ConfiguredModel {
    pub model_id: String,
    pub name: String,
    pub description: String,
    pub state: ProcessState,
}

pub struct RouterOptions {
    pub min_free_memory_percent: f64,
    pub default_health_check_timeout: Duration,
    /// Operator-configured cap on concurrently Ready processes across all
    /// groups (0 = unlimited). Enforced the same way as the memory gate:
    /// LRU non-persistent processes are evicted to make room.
    pub max_ready_processes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            min_free_memory_percent: 10.0,
            default_health_check_timeout: Duration::from_secs(30),
            max_ready_processes: 0,
        }
    }
}

pub struct Router {
    config: RwLock<ConfigState>,
    processes: RwLock<HashMap<String, Arc<Process>>>,
    groups: GroupTable,
    load_tracker: LoadTracker,
    download_manager: Arc<dyn DownloadManager>,
    events: EventBus,
    memory_gate: tokio::sync::Mutex<()>,
    options: RouterOptions,
}

impl Router {
    pub fn new(
        doc: RuntimeDocument,
        download_manager: Arc<dyn DownloadManager>,
        events: EventBus,
        options: RouterOptions,
    ) -> Self {
        let aliases = build_alias_map(&doc);
        let groups = GroupTable::new();
        for (group_id, group_cfg) in &doc.groups {
            groups.insert(
                group_id.clone(),
                Group::new(
                    group_cfg.members.clone(),
                    group_cfg.exclusive,
                    group_cfg.swap,
                    group_cfg.persistent,
                    group_cfg.start_port,
                ),
            );
        }

        Self {
            config: RwLock::new(ConfigState { doc, aliases }),
            processes: RwLock::new(HashMap::new()),
            groups,
            load_tracker: LoadTracker::new(),
            download_manager,
            events,
            memory_gate: tokio::sync::Mutex::new(()),
            options,
        }
    }

    fn resolve_alias(&self, model_id: &str) -> Option<String> {
        self.config.read().unwrap().aliases.get(model_id).cloned()
    }

    fn is_download_spec(model_id: &str) -> bool {
        model_id.contains('/') || model_id.contains(':')
    }

    fn process_for(&self, model_id: &str) -> Option<Arc<Process>> {
        self.processes.read().unwrap().get(model_id).cloned()
    }

    fn ready_check(&self) -> impl Fn(&str) -> bool + '_ {
        move |model_id: &str| {
            self.process_for(model_id)
                .map(|p| p.current_state() == ProcessState::Ready)
                .unwrap_or(false)
        }
    }

    fn get_or_create_process(&self, model_id: &str) -> Result<Arc<Process>, RouterError> {
        if let Some(process) = self.process_for(model_id) {
            return Ok(process);
        }

        let group_id = self
            .groups
            .group_id_for(model_id)
            .ok_or_else(|| RouterError::UnknownModel(model_id.to_string()))?;
        let port = self
            .groups
            .allocate_port(&group_id)
            .ok_or_else(|| RouterError::Internal("group has no port pool".to_string()))?;

        let config = self.config.read().unwrap();
        let model_cfg = config
            .doc
            .models
            .get(model_id)
            .ok_or_else(|| RouterError::UnknownModel(model_id.to_string()))?;

        let cmd = model_cfg.cmd.replace("${PORT}", &port.to_string());
        let mut parts = cmd.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| RouterError::Internal("empty command template".to_string()))?
            .to_string();
        let args: Vec<String> = parts.map(str::to_string).collect();
        let env: Vec<(String, String)> = model_cfg.env.clone().into_iter().collect();
        let ttl = Duration::from_secs(model_cfg.ttl);
        drop(config);

        let spec = ProcessSpec {
            model_id: model_id.to_string(),
            program,
            args,
            env,
            health_check_timeout: self.options.default_health_check_timeout,
            ttl,
        };
        let process = Arc::new(Process::new(spec, port, self.events.clone()));
        self.processes
            .write()
            .unwrap()
            .insert(model_id.to_string(), process.clone());
        Ok(process)
    }

    /// §4.I step 3: evict LRU non-persistent processes until the free
    /// fraction clears `minFreeMemoryPercent`, or fail `OutOfMemory`.
    async fn enforce_memory_gate(&self, excluding: &str, available_fraction: impl Fn() -> f64) {
        let _guard = self.memory_gate.lock().await;
        let threshold = self.options.min_free_memory_percent / 100.0;
        if available_fraction() >= threshold {
            return;
        }

        for candidate in self.load_tracker.lru_order(excluding) {
            if self.groups.is_persistent(&candidate) {
                continue;
            }
            if let Some(process) = self.process_for(&candidate) {
                if process.current_state() == ProcessState::Ready {
                    warn!(model_id = %candidate, "evicting under memory pressure");
                    process.stop(StopStrategy::Immediately).await;
                    self.load_tracker.forget(&candidate);
                }
            }
            if available_fraction() >= threshold {
                return;
            }
        }
    }

    /// Evict LRU non-persistent Ready processes until the count of Ready
    /// processes (excluding `excluding`, which is about to start) is below
    /// `max_ready_processes`. A no-op when the cap is 0 (unlimited).
    async fn enforce_ready_cap(&self, excluding: &str) {
        if self.options.max_ready_processes == 0 {
            return;
        }
        let _guard = self.memory_gate.lock().await;
        let ready_count = |this: &Self| {
            this.processes
                .read()
                .unwrap()
                .values()
                .filter(|p| p.current_state() == ProcessState::Ready && p.model_id() != excluding)
                .count()
        };
        for candidate in self.load_tracker.lru_order(excluding) {
            if ready_count(self) < self.options.max_ready_processes {
                return;
            }
            if self.groups.is_persistent(&candidate) {
                continue;
            }
            if let Some(process) = self.process_for(&candidate) {
                if process.current_state() == ProcessState::Ready {
                    warn!(model_id = %candidate, "evicting over the ready-process cap");
                    process.stop(StopStrategy::Immediately).await;
                    self.load_tracker.forget(&candidate);
                }
            }
        }
    }

    async fn apply_group_policy(&self, model_id: &str) {
        let ready = self.ready_check();
        let mut victims = self.groups.exclusive_victims(model_id, &ready);
        victims.extend(self.groups.swap_victims(model_id, &ready));
        victims.sort();
        victims.dedup();
        for victim in victims {
            if let Some(process) = self.process_for(&victim) {
                info!(model_id = %victim, "stopping group victim");
                process.stop(StopStrategy::WaitForInflightRequest).await;
            }
        }
    }

    /// Splice a newly downloaded model's config into the live map,
    /// including its aliases, under the config write lock (§4.I step 5).
    pub fn splice_downloaded_model(
        &self,
        model_id: String,
        cfg: config_gen::ModelConfig,
        aliases: Vec<String>,
        group_id: &str,
    ) {
        let mut config = self.config.write().unwrap();
        for alias in aliases.iter().chain(std::iter::once(&model_id)) {
            config.aliases.insert(alias.clone(), model_id.clone());
        }
        config.doc.models.insert(model_id.clone(), cfg);
        if let Some(group) = config.doc.groups.get_mut(group_id) {
            group.members.push(model_id.clone());
        }
        drop(config);
        self.events.publish(Event::ConfigFileChanged);
    }

    /// Resolve `requested_model` through the full §4.I pipeline and proxy
    /// `request` to the selected process.
    pub async fn route(
        &self,
        requested_model: &str,
        request: Request<Body>,
        available_fraction: impl Fn() -> f64,
    ) -> Result<Response<Body>, RouterError> {
        let canonical = match self.resolve_alias(requested_model) {
            Some(id) => id,
            None if Self::is_download_spec(requested_model) => {
                return self
                    .auto_download_and_route(requested_model, request, available_fraction)
                    .await;
            }
            None => return Err(RouterError::UnknownModel(requested_model.to_string())),
        };

        let process = self.ensure_ready(&canonical, &available_fraction).await?;
        process
            .proxy_request(request)
            .await
            .map_err(|e| RouterError::Upstream(e.to_string()))
    }

    /// Resolution (§4.I steps 2-4): the memory gate, the ready-process
    /// cap, group policy, then start-if-needed. Shared by `route` (which
    /// additionally proxies the request) and `load_model` (which doesn't).
    async fn ensure_ready(
        &self,
        canonical: &str,
        available_fraction: &impl Fn() -> f64,
    ) -> Result<Arc<Process>, RouterError> {
        if !self.groups.has_member(canonical) {
            return Err(RouterError::UnknownModel(canonical.to_string()));
        }

        self.enforce_memory_gate(canonical, available_fraction).await;
        if available_fraction() < self.options.min_free_memory_percent / 100.0
            && !self.groups.is_persistent(canonical)
        {
            return Err(RouterError::OutOfMemory);
        }
        self.enforce_ready_cap(canonical).await;

        self.apply_group_policy(canonical).await;

        let process = self.get_or_create_process(canonical)?;
        if process.current_state() != ProcessState::Ready {
            process.start().await.map_err(|e| match e {
                crate::services::process::ProcessError::StartupTimeout => RouterError::Timeout,
                other => RouterError::Upstream(other.to_string()),
            })?;
            process.spawn_ttl_watcher();
        }

        self.load_tracker.touch(canonical);
        Ok(process)
    }

    /// `POST /v1/models/load` (§6): run the resolution/gate/policy
    /// pipeline and ensure the process is Ready, without proxying any
    /// request body to it.
    pub async fn load_model(
        &self,
        requested_model: &str,
        available_fraction: impl Fn() -> f64,
    ) -> Result<(), RouterError> {
        let canonical = self
            .resolve_alias(requested_model)
            .ok_or_else(|| RouterError::UnknownModel(requested_model.to_string()))?;
        self.ensure_ready(&canonical, &available_fraction).await?;
        Ok(())
    }

    /// `POST /v1/models/unload` (§6): explicit shutdown, draining any
    /// in-flight request first.
    pub async fn unload_model(&self, requested_model: &str) -> Result<(), RouterError> {
        let canonical = self
            .resolve_alias(requested_model)
            .ok_or_else(|| RouterError::UnknownModel(requested_model.to_string()))?;
        let process = self
            .process_for(&canonical)
            .ok_or_else(|| RouterError::UnknownModel(canonical.clone()))?;
        process.stop(StopStrategy::WaitForInflightRequest).await;
        self.load_tracker.forget(&canonical);
        Ok(())
    }

    async fn auto_download_and_route(
        &self,
        spec: &str,
        request: Request<Body>,
        available_fraction: impl Fn() -> f64,
    ) -> Result<Response<Body>, RouterError> {
        // `spec` is `repo/name` or `repo:quant`; the download manager's
        // inner mechanics are an external collaborator, the contract is
        // what matters here.
        let (repo, filename) = spec
            .split_once(':')
            .map(|(r, q)| (r.to_string(), format!("{q}.gguf")))
            .unwrap_or_else(|| (spec.to_string(), format!("{spec}.gguf")));

        let dest_dir = std::env::temp_dir().join("model-downloads");
        let url = format!("https://huggingface.co/{repo}/resolve/main/{filename}");
        let download_id = self
            .download_manager
            .start_download(&repo, &filename, &url, None, &dest_dir)
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))?;

        let record = self
            .download_manager
            .wait_for_complete(&download_id)
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))?;

        if record.status != crate::services::download::DownloadStatus::Completed {
            return Err(RouterError::Internal(format!(
                "download {download_id} ended in state {:?}",
                record.status
            )));
        }

        // Re-derive a ModelConfig for the downloaded file. A full
        // re-scan-and-replan happens out of band; here we register a
        // minimal entry so the same `spec` resolves on the next call.
        let model_id = format!("{}-{}", repo.replace('/', "-"), filename.trim_end_matches(".gguf"));
        let cfg = config_gen::ModelConfig {
            name: model_id.clone(),
            description: format!("auto-downloaded from {repo}"),
            cmd: format!("${{llama-server-base}} --model {}", record.file_path.display()),
            proxy: "http://127.0.0.1:${PORT}".to_string(),
            ttl: 600,
            env: HashMap::new(),
            aliases: vec![spec.to_string(), repo.clone()],
            context_size: 16384,
            gpu_layers: "all".to_string(),
            kv_cache_type: "q4_0".to_string(),
            batch_size: 2048,
            ubatch_size: 512,
        };
        self.splice_downloaded_model(
            model_id.clone(),
            cfg,
            vec![spec.to_string(), repo],
            "all-models",
        );

        // Step 5 re-enters resolution at step 1 with the new id.
        Box::pin(self.route(&model_id, request, available_fraction)).await
    }

    pub fn process_states(&self) -> Vec<(String, ProcessState, u16)> {
        self.processes
            .read()
            .unwrap()
            .values()
            .map(|p| (p.model_id(), p.current_state(), p.port()))
            .collect()
    }

    /// Every model in the config, loaded or not — `GET /v1/models` (§6)
    /// lists the full catalog, not just processes that have started.
    pub fn configured_models(&self) -> Vec<ConfiguredModel> {
        let config = self.config.read().unwrap();
        let processes = self.processes.read().unwrap();
        config
            .doc
            .models
            .iter()
            .map(|(model_id, cfg)| {
                let state = processes
                    .get(model_id)
                    .map(|p| p.current_state())
                    .unwrap_or(ProcessState::Stopped);
                ConfiguredModel {
                    model_id: model_id.clone(),
                    name: cfg.name.clone(),
                    description: cfg.description.clone(),
                    state,
                }
            })
            .collect()
    }

    pub async fn shutdown_all(&self) {
        let processes: Vec<Arc<Process>> = self.processes.read().unwrap().values().cloned().collect();
        for process in processes {
            process.stop(StopStrategy::WaitForInflightRequest).await;
            process.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_order_excludes_target_and_sorts_oldest_first() {
        let tracker = LoadTracker::new();
        tracker.touch("a");
        std::thread::sleep(Duration::from_millis(5));
        tracker.touch("b");
        std::thread::sleep(Duration::from_millis(5));
        tracker.touch("c");

        // touching "a" again moves it to the back of the LRU order.
        tracker.touch("a");

        let order = tracker.lru_order("c");
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn forget_removes_entry_from_lru_order() {
        let tracker = LoadTracker::new();
        tracker.touch("a");
        tracker.touch("b");
        tracker.forget("a");
        assert_eq!(tracker.lru_order("zzz"), vec!["b".to_string()]);
    }

    #[test]
    fn touch_increments_request_count_without_resetting_loaded_at() {
        let tracker = LoadTracker::new();
        tracker.touch("a");
        tracker.touch("a");
        tracker.touch("a");
        let entries = tracker.entries.read().unwrap();
        assert_eq!(entries.get("a").unwrap().request_count, 3);
    }

    #[test]
    fn download_spec_detection() {
        assert!(Router::is_download_spec("org/repo"));
        assert!(Router::is_download_spec("org/repo:q4_k_m"));
        assert!(!Router::is_download_spec("qwen2-7b-instruct-7b"));
    }

    fn sample_doc() -> RuntimeDocument {
        let mut models = std::collections::BTreeMap::new();
        models.insert(
            "qwen2-7b-instruct-7b".to_string(),
            config_gen::ModelConfig {
                name: "Qwen2 7B Instruct".to_string(),
                description: String::new(),
                cmd: "${llama-server-base} --model /m.gguf".to_string(),
                proxy: "http://127.0.0.1:${PORT}".to_string(),
                ttl: 600,
                env: HashMap::new(),
                aliases: vec!["qwen2-7b".to_string()],
                context_size: 32768,
                gpu_layers: "all".to_string(),
                kv_cache_type: "q8_0".to_string(),
                batch_size: 1024,
                ubatch_size: 256,
            },
        );
        let mut groups = std::collections::BTreeMap::new();
        groups.insert(
            "all-models".to_string(),
            config_gen::GroupConfig {
                members: vec!["qwen2-7b-instruct-7b".to_string()],
                exclusive: false,
                swap: false,
                persistent: false,
                start_port: 9000,
            },
        );
        RuntimeDocument {
            health_check_timeout: 30,
            log_level: "info".to_string(),
            start_port: 8000,
            download_dir: "/tmp/models".to_string(),
            min_free_memory_percent: 10,
            macros: std::collections::BTreeMap::new(),
            models,
            groups,
        }
    }

    #[test]
    fn alias_map_resolves_both_canonical_id_and_configured_aliases() {
        let aliases = build_alias_map(&sample_doc());
        assert_eq!(
            aliases.get("qwen2-7b-instruct-7b").map(String::as_str),
            Some("qwen2-7b-instruct-7b")
        );
        assert_eq!(
            aliases.get("qwen2-7b").map(String::as_str),
            Some("qwen2-7b-instruct-7b")
        );
        assert_eq!(aliases.get("unknown-model"), None);
    }
}
