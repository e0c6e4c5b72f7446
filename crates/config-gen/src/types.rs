//! The generated runtime config document (§6): macros, per-model launch
//! entries, and groups, serialized as YAML.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDocument {
    pub health_check_timeout: u64,
    pub log_level: String,
    pub start_port: u16,
    pub download_dir: String,
    pub min_free_memory_percent: u8,
    pub macros: BTreeMap<String, String>,
    pub models: BTreeMap<String, ModelConfig>,
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub description: String,
    /// Multi-line launch command; `${PORT}` is expanded by the supervisor.
    pub cmd: String,
    pub proxy: String,
    pub ttl: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    /// Derived params surfaced for the update API (§3).
    pub context_size: u32,
    pub gpu_layers: String,
    pub kv_cache_type: String,
    pub batch_size: u32,
    pub ubatch_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub members: Vec<String>,
    pub exclusive: bool,
    pub swap: bool,
    pub persistent: bool,
    pub start_port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("failed to serialize runtime config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// A per-model failure recorded during a batch generation run; one bad
/// model never blocks the rest of the batch (§7 propagation policy).
#[derive(Debug, Clone)]
pub struct ModelGenerationError {
    pub path: std::path::PathBuf,
    pub reason: String,
}
