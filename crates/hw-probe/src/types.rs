//! Hardware-probe data types.

use serde::{Deserialize, Serialize};

/// A GPU backend the inference child binary can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cuda,
    Rocm,
    Vulkan,
    Metal,
    Cpu,
}

impl Backend {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Rocm => "rocm",
            Self::Vulkan => "vulkan",
            Self::Metal => "metal",
            Self::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One detected GPU device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub index: usize,
    pub vendor_tag: Backend,
    pub name: String,
    pub total_vram_gb: f64,
    pub free_vram_gb: f64,
}

/// A best-effort, deterministic snapshot of the host's compute resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub os: String,
    pub arch: String,
    pub cpu_logical: usize,
    pub cpu_physical: usize,
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    pub gpus: Vec<GpuInfo>,
    /// Backends available on this host, ordered by preference (best first).
    pub backends: Vec<Backend>,
}

impl SystemSnapshot {
    /// Total VRAM across every detected GPU.
    pub fn total_vram_gb(&self) -> f64 {
        self.gpus.iter().map(|g| g.total_vram_gb).sum()
    }

    /// Free VRAM across every detected GPU.
    pub fn free_vram_gb(&self) -> f64 {
        self.gpus.iter().map(|g| g.free_vram_gb).sum()
    }

    /// The best backend this host can run, or `Cpu` if nothing else was found.
    pub fn preferred_backend(&self) -> Backend {
        self.backends.first().copied().unwrap_or(Backend::Cpu)
    }
}

/// Caller-forced overrides. A set field is reflected in the snapshot unchanged,
/// bypassing detection entirely for that field.
#[derive(Debug, Clone, Default)]
pub struct ProbeOverrides {
    pub backend: Option<Backend>,
    pub ram_gb: Option<f64>,
    pub vram_gb: Option<f64>,
}

/// A realtime refresh of just the *available* (not total) figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AvailableResources {
    pub available_ram_gb: f64,
    pub available_vram_gb: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe tool timed out")]
    Timeout,
    #[error("probe tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("failed to parse probe output: {0}")]
    ParseError(String),
}
