//! Provisioning types: the on-disk sidecar, caller-facing options/results,
//! and the failure taxonomy (§4.F).

use std::path::PathBuf;

use hw_probe::Backend;
use serde::{Deserialize, Serialize};

/// Sidecar metadata written beside the extracted binary so a later run can
/// decide whether to reuse it without re-downloading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sidecar {
    #[serde(rename = "type")]
    pub backend: Backend,
    pub version: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Directory the binary is extracted into and the sidecar lives beside.
    pub managed_dir: PathBuf,
    /// Force a specific backend instead of the host's preferred one.
    pub forced_backend: Option<Backend>,
    /// Pin a release version instead of resolving the latest tag.
    pub version_override: Option<String>,
    /// Compile-time fallback used when the release-tag endpoint is
    /// unreachable within `resolve_timeout`.
    pub compile_time_default_version: String,
    pub resolve_timeout_secs: u64,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            managed_dir: PathBuf::from("bin"),
            forced_backend: None,
            version_override: None,
            compile_time_default_version: "b4500".to_string(),
            resolve_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionResult {
    pub executable_path: PathBuf,
    /// The backend actually provisioned — may differ from the host's
    /// preferred backend if the fallback chain had to step down.
    pub resolved_backend: Backend,
    pub version: String,
    pub reused_existing: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("no release archive available for this platform/backend combination")]
    NoBinaryForPlatform,
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("failed to extract archive: {0}")]
    ExtractFailed(String),
    #[error("no executable found in extracted archive")]
    ExecutableNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
