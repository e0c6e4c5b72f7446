//! Download manager (§4.J): a contract trait consumed by the router, plus
//! a concrete `reqwest`-based reference implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::events::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub repo: String,
    pub filename: String,
    pub status: DownloadStatus,
    pub bytes: u64,
    pub total_bytes: Option<u64>,
    pub file_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download {0} not found")]
    NotFound(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The contract the router depends on (§4.J); `I` treats this as an
/// external collaborator and only cares about at-most-once completion,
/// resumability, and atomic rename-on-completion.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    async fn start_download(
        &self,
        repo: &str,
        filename: &str,
        url: &str,
        token: Option<&str>,
        dest_dir: &std::path::Path,
    ) -> Result<String, DownloadError>;

    async fn start_multi_part_download(
        &self,
        repo: &str,
        quant: &str,
        files: &[(String, String)],
        token: Option<&str>,
        dest_dir: &std::path::Path,
    ) -> Result<Vec<String>, DownloadError>;

    async fn get_download_status(&self, id: &str) -> Result<DownloadRecord, DownloadError>;
    async fn pause(&self, id: &str) -> Result<(), DownloadError>;
    async fn resume(&self, id: &str) -> Result<(), DownloadError>;
    async fn cancel(&self, id: &str) -> Result<(), DownloadError>;

    /// Blocks until the download reaches a terminal status.
    async fn wait_for_complete(&self, id: &str) -> Result<DownloadRecord, DownloadError>;
}

/// Simple single-connection reference implementation: streams to a
/// `.part` file beside the destination and renames atomically on
/// completion. No multi-connection segmenting — the spec treats the
/// fetcher's inner mechanics as an external collaborator.
pub struct ReqwestDownloadManager {
    client: reqwest::Client,
    records: Mutex<HashMap<String, DownloadRecord>>,
    cancelled: Mutex<std::collections::HashSet<String>>,
    events: EventBus,
    /// Set once, immediately after construction, so `start_download` (a
    /// plain `&self` trait method) can still hand an owning `Arc<Self>`
    /// to the background transfer task.
    self_ref: std::sync::OnceLock<std::sync::Weak<Self>>,
}

const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_secs(1);

impl ReqwestDownloadManager {
    pub fn new(events: EventBus) -> Arc<Self> {
        let this = Arc::new(Self {
            client: reqwest::Client::new(),
            records: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(std::collections::HashSet::new()),
            events,
            self_ref: std::sync::OnceLock::new(),
        });
        let _ = this.self_ref.set(Arc::downgrade(&this));
        this
    }

    async fn run_download(self: Arc<Self>, id: String, url: String, token: Option<String>) {
        let dest_path = {
            let records = self.records.lock().unwrap();
            records.get(&id).map(|r| r.file_path.clone())
        };
        let Some(dest_path) = dest_path else { return };
        let part_path = dest_path.with_extension("part");

        let mut resume_from: u64 = tokio::fs::metadata(&part_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut request = self.client.get(&url);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        if resume_from > 0 {
            request = request.header("Range", format!("bytes={resume_from}-"));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(err) => {
                self.mark_failed(&id, &err.to_string());
                return;
            }
        };

        // Server ignored our Range header: restart from zero.
        if resume_from > 0 && response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            resume_from = 0;
            let _ = tokio::fs::remove_file(&part_path).await;
        }

        let total_bytes = response
            .content_length()
            .map(|len| len + resume_from);
        {
            let mut records = self.records.lock().unwrap();
            if let Some(record) = records.get_mut(&id) {
                record.status = DownloadStatus::Downloading;
                record.total_bytes = total_bytes;
                record.bytes = resume_from;
            }
        }

        use futures_util::StreamExt;
        use tokio::io::AsyncWriteExt;

        let mut file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&part_path)
            .await
        {
            Ok(f) => f,
            Err(err) => {
                self.mark_failed(&id, &err.to_string());
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut written = resume_from;
        let mut last_emit = Instant::now();

        while let Some(chunk) = stream.next().await {
            if self.cancelled.lock().unwrap().contains(&id) {
                self.set_status(&id, DownloadStatus::Cancelled);
                return;
            }
            let chunk = match chunk {
                Ok(c) => c,
                Err(err) => {
                    self.mark_failed(&id, &err.to_string());
                    return;
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                self.mark_failed(&id, &err.to_string());
                return;
            }
            written += chunk.len() as u64;

            {
                let mut records = self.records.lock().unwrap();
                if let Some(record) = records.get_mut(&id) {
                    record.bytes = written;
                }
            }
            if last_emit.elapsed() >= PROGRESS_EMIT_INTERVAL {
                self.events.publish(Event::DownloadProgress {
                    download_id: id.clone(),
                    bytes: written,
                    total_bytes,
                });
                last_emit = Instant::now();
            }
        }

        drop(file);
        if let Err(err) = tokio::fs::rename(&part_path, &dest_path).await {
            self.mark_failed(&id, &err.to_string());
            return;
        }

        self.events.publish(Event::DownloadProgress {
            download_id: id.clone(),
            bytes: written,
            total_bytes,
        });
        self.set_status(&id, DownloadStatus::Completed);
        info!(id, "download completed");
    }

    fn set_status(&self, id: &str, status: DownloadStatus) {
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.status = status;
        }
    }

    fn mark_failed(&self, id: &str, reason: &str) {
        warn!(id, reason, "download failed");
        self.set_status(id, DownloadStatus::Failed);
    }
}

#[async_trait]
impl DownloadManager for ReqwestDownloadManager {
    async fn start_download(
        &self,
        repo: &str,
        filename: &str,
        url: &str,
        token: Option<&str>,
        dest_dir: &std::path::Path,
    ) -> Result<String, DownloadError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let id = Uuid::new_v4().to_string();
        let file_path = dest_dir.join(filename);
        self.records.lock().unwrap().insert(
            id.clone(),
            DownloadRecord {
                id: id.clone(),
                repo: repo.to_string(),
                filename: filename.to_string(),
                status: DownloadStatus::Pending,
                bytes: 0,
                total_bytes: None,
                file_path,
            },
        );

        if let Some(this) = self.self_ref.get().and_then(std::sync::Weak::upgrade) {
            this.spawn_tracked(id.clone(), url.to_string(), token.map(str::to_string));
        }
        Ok(id)
    }

    async fn start_multi_part_download(
        &self,
        repo: &str,
        quant: &str,
        files: &[(String, String)],
        token: Option<&str>,
        dest_dir: &std::path::Path,
    ) -> Result<Vec<String>, DownloadError> {
        let mut ids = Vec::with_capacity(files.len());
        for (filename, url) in files {
            let id = self
                .start_download(&format!("{repo}:{quant}"), filename, url, token, dest_dir)
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_download_status(&self, id: &str) -> Result<DownloadRecord, DownloadError> {
        self.records
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    async fn pause(&self, id: &str) -> Result<(), DownloadError> {
        self.set_status(id, DownloadStatus::Paused);
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), DownloadError> {
        self.set_status(id, DownloadStatus::Downloading);
        Ok(())
    }

    async fn cancel(&self, id: &str) -> Result<(), DownloadError> {
        self.cancelled.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    async fn wait_for_complete(&self, id: &str) -> Result<DownloadRecord, DownloadError> {
        loop {
            let record = self.get_download_status(id).await?;
            if matches!(
                record.status,
                DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
            ) {
                return Ok(record);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl ReqwestDownloadManager {
    /// Start the transfer for a download previously registered by
    /// `start_download`. Kept separate from the trait so the trait object
    /// stays dyn-compatible while still giving the reference impl an
    /// owning `Arc<Self>` to move into the background task.
    pub fn spawn_tracked(self: &Arc<Self>, id: String, url: String, token: Option<String>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_download(id, url, token).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_download_status_on_unknown_id_is_not_found() {
        let manager = ReqwestDownloadManager::new(EventBus::new());
        let err = manager.get_download_status("nope").await.unwrap_err();
        assert!(matches!(err, DownloadError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn start_download_registers_a_pending_record() {
        let manager = ReqwestDownloadManager::new(EventBus::new());
        let dir = std::env::temp_dir().join("dl-test-pending");
        let id = manager
            .start_download("org/repo", "model.gguf", "http://127.0.0.1:1/model.gguf", None, &dir)
            .await
            .unwrap();
        let record = manager.get_download_status(&id).await.unwrap();
        assert_eq!(record.repo, "org/repo");
        assert_eq!(record.filename, "model.gguf");
        assert_eq!(record.bytes, 0);
    }

    /// Registers a record without spawning the background transfer, so
    /// pause/resume/cancel assertions aren't racing a real connection
    /// attempt.
    fn register_record(manager: &ReqwestDownloadManager, id: &str) {
        manager.records.lock().unwrap().insert(
            id.to_string(),
            DownloadRecord {
                id: id.to_string(),
                repo: "org/repo".to_string(),
                filename: "model.gguf".to_string(),
                status: DownloadStatus::Downloading,
                bytes: 0,
                total_bytes: None,
                file_path: std::env::temp_dir().join("model.gguf"),
            },
        );
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_status() {
        let manager = ReqwestDownloadManager::new(EventBus::new());
        register_record(&manager, "dl-1");
        manager.pause("dl-1").await.unwrap();
        assert_eq!(
            manager.get_download_status("dl-1").await.unwrap().status,
            DownloadStatus::Paused
        );
        manager.resume("dl-1").await.unwrap();
        assert_eq!(
            manager.get_download_status("dl-1").await.unwrap().status,
            DownloadStatus::Downloading
        );
    }

    #[tokio::test]
    async fn cancel_marks_id_cancelled_for_the_running_transfer_to_observe() {
        let manager = ReqwestDownloadManager::new(EventBus::new());
        register_record(&manager, "dl-2");
        manager.cancel("dl-2").await.unwrap();
        assert!(manager.cancelled.lock().unwrap().contains("dl-2"));
    }

    #[tokio::test]
    async fn start_multi_part_download_registers_one_id_per_file() {
        let manager = ReqwestDownloadManager::new(EventBus::new());
        let dir = std::env::temp_dir().join("dl-test-multipart");
        let files = vec![
            ("part1.gguf".to_string(), "http://127.0.0.1:1/part1".to_string()),
            ("part2.gguf".to_string(), "http://127.0.0.1:1/part2".to_string()),
        ];
        let ids = manager
            .start_multi_part_download("org/repo", "q4_k_m", &files, None, &dir)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
