//! Planner input/output types (§4.D).

use serde::{Deserialize, Serialize};

/// The planning policy selected by the operator (affects GPU-layer
/// placement, context ladder, and parallel-slot sizing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Offload every layer regardless of fit; maximize tokens/sec.
    MaxSpeed,
    /// Balance offloading against context size. The default.
    #[default]
    Balanced,
    /// Favor multiple concurrent request slots over raw context size.
    Deployment,
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    pub policy: Policy,
    /// Minimum acceptable context size (`C_min` in §4.D step 1); 16384 by
    /// default.
    pub context_floor: u32,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            context_floor: 16384,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvCacheType {
    F16,
    Q8_0,
    Q4_0,
}

impl KvCacheType {
    /// Bytes per cached scalar pair, relative to `f16`'s 2 bytes (`b(kv)`).
    pub fn bytes_per_element(self) -> f64 {
        match self {
            Self::F16 => 2.0,
            Self::Q8_0 => 1.0,
            Self::Q4_0 => 0.5,
        }
    }

    pub fn as_flag(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::Q8_0 => "q8_0",
            Self::Q4_0 => "q4_0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuLayers {
    /// Every layer; serialized as the `-ngl 999` sentinel (§9 open question 1).
    All,
    Count(u32),
}

impl GpuLayers {
    pub fn as_ngl_value(self) -> u32 {
        match self {
            Self::All => 999,
            Self::Count(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Plan {
    pub context_size: u32,
    pub gpu_layers: GpuLayers,
    pub kv_cache_type: KvCacheType,
    pub batch_size: u32,
    pub ubatch_size: u32,
    /// Parallel request slots; 1 unless `Policy::Deployment` chose more.
    pub parallel_slots: u32,
    pub mlock: bool,
    /// The estimated VRAM this plan will consume, for the planner's own
    /// invariant checking and for the router's memory-gate bookkeeping.
    pub estimated_vram_gb: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error(
        "model requires {required:.1} GB but only {available:.1} GB of VRAM+RAM headroom is available"
    )]
    ModelTooLarge { required: f64, available: f64 },
}
