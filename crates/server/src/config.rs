//! Application configuration — persisted as JSON (§6 "App configuration").
//! Distinct from the generated runtime document (`config_gen::RuntimeDocument`),
//! which is this process's *output*, not its bootstrap input.

use std::path::{Path, PathBuf};

use mem_planner::{Policy, PlannerOptions};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub model_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Free-memory floor the router's memory gate enforces before loading
    /// a non-persistent model (§4.I step 3).
    #[serde(default = "default_min_free_memory_percent")]
    pub min_free_memory_percent: f64,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub planner_policy: PlannerPolicyConfig,
    #[serde(default = "default_context_floor")]
    pub context_floor: u32,
}

/// JSON-friendly mirror of `mem_planner::Policy` (the planner type itself
/// doesn't need serde — only this bootstrap config does).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlannerPolicyConfig {
    MaxSpeed,
    #[default]
    Balanced,
    Deployment,
}

impl From<PlannerPolicyConfig> for Policy {
    fn from(value: PlannerPolicyConfig) -> Self {
        match value {
            PlannerPolicyConfig::MaxSpeed => Policy::MaxSpeed,
            PlannerPolicyConfig::Balanced => Policy::Balanced,
            PlannerPolicyConfig::Deployment => Policy::Deployment,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_min_free_memory_percent() -> f64 {
    10.0
}
fn default_download_dir() -> PathBuf {
    AppConfig::config_dir().join("models")
}
fn default_context_floor() -> u32 {
    16384
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model_dirs: Vec::new(),
            api_key: None,
            min_free_memory_percent: default_min_free_memory_percent(),
            download_dir: default_download_dir(),
            planner_policy: PlannerPolicyConfig::default(),
            context_floor: default_context_floor(),
        }
    }
}

impl AppConfig {
    /// Platform config directory: `~/.config/llama-dashboard/`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("llama-dashboard")
    }

    fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    pub fn db_path(&self) -> PathBuf {
        Self::config_dir().join("data.db")
    }

    pub fn runtime_config_path(&self) -> PathBuf {
        Self::config_dir().join("runtime.yaml")
    }

    pub fn folders_path(&self) -> PathBuf {
        Self::config_dir().join("folders.json")
    }

    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            policy: self.planner_policy.into(),
            context_floor: self.context_floor,
        }
    }

    /// Load from disk, or return defaults if the file doesn't exist.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::config_file();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir)?;
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_file(), data)?;
        Ok(())
    }
}

/// Folder database (§6): directories the operator has registered for
/// scanning, independent of the one-shot `model_dirs` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
    pub path: PathBuf,
    pub added_at: chrono::DateTime<chrono::Utc>,
    pub last_scanned: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FolderDatabase {
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
    pub last_scan: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_folder_db_version")]
    pub version: u32,
}

fn default_folder_db_version() -> u32 {
    1
}

impl FolderDatabase {
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
