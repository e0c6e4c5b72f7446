//! Process supervisor (§4.G): owns the lifecycle of one spawned inference
//! child and proxies requests to it once it is healthy.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::services::events::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Ready,
    Stopping,
    Shutdown,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Ready => "Ready",
            Self::Stopping => "Stopping",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStrategy {
    Immediately,
    WaitForInflightRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("startup timed out waiting for health check")]
    StartupTimeout,
    #[error("child process exited before becoming ready")]
    ChildExitedEarly,
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("process is not ready")]
    NotReady,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the supervisor needs to spawn and address the child.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub model_id: String,
    /// `cmdTemplate` with `${PORT}` already resolved to `port`.
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub health_check_timeout: Duration,
    pub ttl: Duration,
}

pub struct Process {
    spec: Mutex<ProcessSpec>,
    port: u16,
    state_tx: watch::Sender<ProcessState>,
    state_rx: watch::Receiver<ProcessState>,
    child: Mutex<Option<Child>>,
    pid: Mutex<Option<u32>>,
    last_used_at: Mutex<Instant>,
    request_count: AtomicU64,
    start_lock: tokio::sync::Mutex<()>,
    http: reqwest::Client,
    events: EventBus,
    in_flight: AtomicU64,
    ttl_watcher_running: AtomicBool,
}

impl Process {
    pub fn new(spec: ProcessSpec, port: u16, events: EventBus) -> Self {
        let (state_tx, state_rx) = watch::channel(ProcessState::Stopped);
        Self {
            spec: Mutex::new(spec),
            port,
            state_tx,
            state_rx,
            child: Mutex::new(None),
            pid: Mutex::new(None),
            last_used_at: Mutex::new(Instant::now()),
            request_count: AtomicU64::new(0),
            start_lock: tokio::sync::Mutex::new(()),
            http: reqwest::Client::new(),
            events,
            in_flight: AtomicU64::new(0),
            ttl_watcher_running: AtomicBool::new(false),
        }
    }

    pub fn model_id(&self) -> String {
        self.spec.lock().unwrap().model_id.clone()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn current_state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    pub fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock().unwrap()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ProcessState) {
        let model_id = self.model_id();
        let _ = self.state_tx.send(state);
        self.events.publish(Event::ProcessStateChange {
            model_id,
            state: state.to_string(),
        });
    }

    /// Starts the child if it isn't already Starting/Ready. A single
    /// process never has two concurrent `start()`s — the `start_lock`
    /// serializes callers, and a caller that arrives once the first has
    /// already reached Ready returns immediately.
    pub async fn start(&self) -> Result<(), ProcessError> {
        let _guard = self.start_lock.lock().await;
        if matches!(self.current_state(), ProcessState::Ready | ProcessState::Starting) {
            return Ok(());
        }

        self.set_state(ProcessState::Starting);

        let spec = self.spec.lock().unwrap().clone();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(err) => {
                self.set_state(ProcessState::Stopped);
                return Err(err.into());
            }
        };
        *self.pid.lock().unwrap() = child.id();

        let health_url = format!("http://127.0.0.1:{}/health", self.port);
        let deadline = Instant::now() + spec.health_check_timeout;
        let mut ready = false;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = child.try_wait() {
                warn!(model_id = %spec.model_id, ?status, "child exited during startup");
                *self.child.lock().unwrap() = None;
                self.set_state(ProcessState::Stopped);
                return Err(ProcessError::ChildExitedEarly);
            }
            if let Ok(resp) = self.http.get(&health_url).send().await {
                if resp.status().is_success() {
                    ready = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        *self.child.lock().unwrap() = Some(child);

        if !ready {
            self.stop(StopStrategy::Immediately).await;
            return Err(ProcessError::StartupTimeout);
        }

        info!(model_id = %spec.model_id, port = self.port, "inference child ready");
        *self.last_used_at.lock().unwrap() = Instant::now();
        self.set_state(ProcessState::Ready);
        Ok(())
    }

    /// Starts the idle-TTL watcher if one isn't already running for this
    /// process (§4.G: "a scheduled task per Process, reset on each
    /// `ProxyRequest` entry"). A no-op for `ttlSeconds == 0`. The watcher
    /// exits on its own once the process leaves Ready.
    pub fn spawn_ttl_watcher(self: &Arc<Self>) {
        let ttl = self.spec.lock().unwrap().ttl;
        if ttl.is_zero() {
            return;
        }
        if self
            .ttl_watcher_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                if this.current_state() != ProcessState::Ready {
                    break;
                }
                let idle_for = Instant::now().duration_since(this.last_used_at());
                if idle_for >= ttl {
                    info!(model_id = %this.model_id(), "ttl expired, stopping idle process");
                    this.stop(StopStrategy::WaitForInflightRequest).await;
                    break;
                }
                tokio::time::sleep(ttl - idle_for).await;
            }
            this.ttl_watcher_running.store(false, Ordering::SeqCst);
        });
    }

    /// `Immediately` sends SIGTERM-equivalent (child kill) right away;
    /// `WaitForInflightRequest` first refuses new requests and drains the
    /// in-flight count before doing the same.
    pub async fn stop(&self, strategy: StopStrategy) {
        if matches!(self.current_state(), ProcessState::Stopped | ProcessState::Shutdown) {
            return;
        }
        self.set_state(ProcessState::Stopping);

        if strategy == StopStrategy::WaitForInflightRequest {
            let deadline = Instant::now() + Duration::from_secs(30);
            while self.in_flight.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        let mut guard = self.child.lock().unwrap();
        if let Some(mut child) = guard.take() {
            let _ = child.start_kill();
        }
        drop(guard);

        self.set_state(ProcessState::Stopped);
    }

    pub fn shutdown(&self) {
        let mut guard = self.child.lock().unwrap();
        if let Some(mut child) = guard.take() {
            let _ = child.start_kill();
        }
        self.set_state(ProcessState::Shutdown);
    }

    /// Proxies `request` to the child, starting it first if necessary.
    /// Streams the upstream body back without buffering it whole.
    pub async fn proxy_request(&self, request: Request<Body>) -> Result<Response<Body>, ProcessError> {
        if self.current_state() != ProcessState::Ready {
            self.start().await?;
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self.do_proxy(request).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        *self.last_used_at.lock().unwrap() = Instant::now();
        self.request_count.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn do_proxy(&self, request: Request<Body>) -> Result<Response<Body>, ProcessError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://127.0.0.1:{}{}", self.port, path_and_query);

        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ProcessError::Upstream(e.to_string()))?;

        let mut upstream_req = self.http.request(parts.method.clone(), &url);
        for (name, value) in parts.headers.iter() {
            if name == axum::http::header::HOST {
                continue;
            }
            upstream_req = upstream_req.header(name, value);
        }
        upstream_req = upstream_req.body(body_bytes);

        let upstream_resp = upstream_req
            .send()
            .await
            .map_err(|e| ProcessError::Upstream(e.to_string()))?;

        let status = StatusCode::from_u16(upstream_resp.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut builder = Response::builder().status(status);
        for (name, value) in upstream_resp.headers().iter() {
            builder = builder.header(name, value);
        }
        let stream = upstream_resp.bytes_stream();
        let response = builder
            .body(Body::from_stream(stream))
            .map_err(|e| ProcessError::Upstream(e.to_string()))?;
        Ok(response)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::EventBus;

    fn spec() -> ProcessSpec {
        ProcessSpec {
            model_id: "m1".to_string(),
            program: "/bin/true".to_string(),
            args: vec![],
            env: vec![],
            health_check_timeout: Duration::from_millis(50),
            ttl: Duration::from_secs(0),
        }
    }

    #[test]
    fn new_process_starts_stopped() {
        let process = Process::new(spec(), 9000, EventBus::new());
        assert_eq!(process.current_state(), ProcessState::Stopped);
        assert_eq!(process.port(), 9000);
        assert_eq!(process.model_id(), "m1");
        assert_eq!(process.request_count(), 0);
    }

    #[tokio::test]
    async fn stopping_an_already_stopped_process_is_a_noop() {
        let process = Process::new(spec(), 9001, EventBus::new());
        process.stop(StopStrategy::Immediately).await;
        assert_eq!(process.current_state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_is_terminal() {
        let process = Process::new(spec(), 9002, EventBus::new());
        process.shutdown();
        assert_eq!(process.current_state(), ProcessState::Shutdown);
    }

    #[test]
    fn ttl_watcher_is_a_noop_when_ttl_is_zero() {
        let process = Arc::new(Process::new(spec(), 9003, EventBus::new()));
        process.spawn_ttl_watcher();
        assert!(!process.ttl_watcher_running.load(Ordering::SeqCst));
    }
}
