//! Resource-aware runtime parameter planner (§4.D): given a model's shape
//! and a hardware snapshot, picks a GPU-layer split, context size, KV-cache
//! quantization, batch parameters, and mlock policy that fit the available
//! memory.

pub mod types;

pub use types::{GpuLayers, KvCacheType, Plan, PlannerError, PlannerOptions, Policy};

use hw_probe::SystemSnapshot;
use model_detector::ModelRecord;

const GB: f64 = 1.0;
const VRAM_RESERVE_GB: f64 = 1.0;
const RAM_RESERVE_FRACTION: f64 = 0.25;

/// Hidden-size bucket used by the KV-cache formula, keyed on layer count
/// when the model doesn't report an embedding dimension directly.
fn hidden_size_bucket(model: &ModelRecord) -> f64 {
    if model.embedding_dim > 0 {
        return model.embedding_dim as f64;
    }
    match model.layer_count {
        0..=28 => 2048.0,
        29..=36 => 3072.0,
        37..=48 => 4096.0,
        _ => 5120.0,
    }
}

fn has_sliding_window(model: &ModelRecord) -> bool {
    model.sliding_window_size > 0
}

/// `kvBytes(k, C, kv) = 2 * k * H * C * b(kv)`, in GB.
fn kv_bytes_gb(layers: u32, hidden: f64, context: u32, kv: KvCacheType) -> f64 {
    2.0 * layers as f64 * hidden * context as f64 * kv.bytes_per_element() / 1024f64.powi(3)
}

/// Candidate KV-cache types to try for a given model and placement regime,
/// most-precise first. A sliding-window architecture is pinned to f16 since
/// the smaller candidates have not been validated against it; a model at or
/// above 20B in the GPU-only regime skips f16 since its KV cache alone would
/// dwarf the savings from offloading the full network.
fn kv_candidates(model: &ModelRecord, gpu_only: bool) -> &'static [KvCacheType] {
    if has_sliding_window(model) {
        return &[KvCacheType::F16];
    }
    if gpu_only && model.size_gb >= 20.0 {
        return &[KvCacheType::Q4_0, KvCacheType::Q8_0];
    }
    &[KvCacheType::F16, KvCacheType::Q8_0, KvCacheType::Q4_0]
}

/// The "best" (most permissive) KV-cache type used purely to budget the
/// GPU-layer binary search in step 1 — q4_0 unless a sliding window forces
/// f16, in which case q4_0 has no validated numerics for this architecture.
fn budget_kv_cache_type(model: &ModelRecord) -> KvCacheType {
    if has_sliding_window(model) {
        KvCacheType::F16
    } else {
        KvCacheType::Q4_0
    }
}

/// Per-layer share of the model's total weight size.
fn per_layer_gb(model: &ModelRecord) -> f64 {
    if model.layer_count == 0 {
        return model.size_gb;
    }
    model.size_gb / model.layer_count as f64
}

/// Step 1: find the largest `k <= L` gpu layer count such that offloading
/// `k` layers, plus a KV cache sized for `context_floor` at the most
/// permissive quantization, plus the fixed reserve, fits in `available_vram`.
fn place_gpu_layers(model: &ModelRecord, available_vram_gb: f64, context_floor: u32) -> u32 {
    let layers = model.layer_count.max(1);
    let hidden = hidden_size_bucket(model);
    let kv = budget_kv_cache_type(model);
    let fits = |k: u32| -> bool {
        let weight_gb = per_layer_gb(model) * k as f64;
        let kv_gb = kv_bytes_gb(k, hidden, context_floor, kv);
        weight_gb + kv_gb + VRAM_RESERVE_GB <= available_vram_gb
    };

    if !fits(0) {
        return 0;
    }
    if fits(layers) {
        return layers;
    }
    let (mut lo, mut hi) = (0u32, layers);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

const GPU_ONLY_LADDER: &[u32] = &[16384, 20480, 24576, 32768, 49152, 65536, 98304, 131072];
const HYBRID_LADDER: &[u32] = &[16384, 20480, 24576];

/// Step 3: pick the largest context size on the appropriate ladder for which
/// every candidate KV-cache type's budget still fits, reporting that type.
/// Returns `None` if not even the smallest rung fits — step 4 then applies
/// the floor/fallback rule.
fn select_context(
    model: &ModelRecord,
    gpu_layers: u32,
    vram_headroom_gb: f64,
    ram_headroom_gb: f64,
) -> Option<(u32, KvCacheType)> {
    let total_layers = model.layer_count.max(1);
    let gpu_only = gpu_layers >= total_layers;
    let hidden = hidden_size_bucket(model);
    let kv_types = kv_candidates(model, gpu_only);
    let ladder = if gpu_only { GPU_ONLY_LADDER } else { HYBRID_LADDER };

    let cmax = model.context_length;
    let mut best: Option<(u32, KvCacheType)> = None;
    for &context in ladder {
        if cmax > 0 && context > cmax {
            // Ladder is ascending (§4.D step 3 "truncated at Cmax"); once a
            // rung exceeds the model's own max context, every later rung
            // does too.
            break;
        }
        for &kv in kv_types {
            let kv_gb = kv_bytes_gb(gpu_layers, hidden, context, kv);
            let fits = if gpu_only {
                kv_gb <= vram_headroom_gb
            } else {
                // Hybrid: the GPU-resident portion of the cache must still
                // fit in VRAM headroom; overflow beyond that spills to RAM.
                let vram_part = kv_gb.min(vram_headroom_gb);
                let ram_part = kv_gb - vram_part;
                vram_part <= vram_headroom_gb && ram_part <= ram_headroom_gb
            };
            if fits {
                best = Some((context, kv));
                break;
            }
        }
        if best.map(|(c, _)| c) != Some(context) {
            // This rung didn't fit under any candidate kv type; since the
            // ladder is increasing, no larger rung will either.
            break;
        }
    }
    best
}

/// Step 5: batch/ubatch size tiers by model size and role.
fn batch_params(model: &ModelRecord) -> (u32, u32) {
    if model.is_embedding {
        (1024, 512)
    } else if model.size_gb >= 20.0 {
        (1024, 256)
    } else if model.size_gb >= 7.0 {
        (1024, 256)
    } else {
        (2048, 512)
    }
}

/// Step 5: under `Policy::Deployment`, widen to the largest slot count in
/// `{4, 3, 2}` for which each slot still retains at least 8000 tokens of
/// context; otherwise a single slot.
fn parallel_slots(policy: Policy, context_size: u32) -> u32 {
    if policy != Policy::Deployment {
        return 1;
    }
    for candidates in [4u32, 3, 2] {
        if context_size / candidates >= 8000 {
            return candidates;
        }
    }
    1
}

/// Step 6: mlock is only safe when the model's resident footprint plus a
/// role-based headroom still leaves three quarters of total RAM free, and
/// never for generative models at or above 8GB regardless of headroom.
fn mlock_allowed(model: &ModelRecord, total_ram_gb: f64) -> bool {
    if !model.is_embedding && model.size_gb >= 8.0 {
        return false;
    }
    let headroom = if model.is_embedding { 2.0 } else { 4.0 };
    model.size_gb + headroom <= 0.75 * total_ram_gb
}

/// Produce a runtime plan for `model` on `snapshot` under `options`.
pub fn plan(
    model: &ModelRecord,
    snapshot: &SystemSnapshot,
    options: &PlannerOptions,
) -> Result<Plan, PlannerError> {
    let available_vram_gb = snapshot.free_vram_gb();
    let available_ram_gb = snapshot.available_ram_gb;
    let total_ram_gb = snapshot.total_ram_gb;

    let total_headroom = available_vram_gb + RAM_RESERVE_FRACTION * available_ram_gb;
    if model.size_gb + VRAM_RESERVE_GB > total_headroom {
        return Err(PlannerError::ModelTooLarge {
            required: model.size_gb + VRAM_RESERVE_GB,
            available: total_headroom,
        });
    }

    let total_layers = model.layer_count.max(1);
    let gpu_layers = match options.policy {
        Policy::MaxSpeed => total_layers,
        _ => place_gpu_layers(model, available_vram_gb, options.context_floor),
    };

    let weight_vram_gb = per_layer_gb(model) * gpu_layers as f64;
    let vram_headroom_gb = (available_vram_gb - weight_vram_gb - VRAM_RESERVE_GB).max(0.0);
    let ram_headroom_gb = (available_ram_gb - RAM_RESERVE_FRACTION * total_ram_gb).max(0.0);

    let (context_size, kv_cache_type) =
        match select_context(model, gpu_layers, vram_headroom_gb, ram_headroom_gb) {
            Some(picked) => picked,
            None => {
                // Step 4: floor/fallback. Never exceed the model's own max
                // context; fall back to the most compact cache type.
                let cmax = model.context_length.max(1);
                let floor = options.context_floor.min(cmax).max(1);
                let kv = if has_sliding_window(model) {
                    KvCacheType::F16
                } else {
                    KvCacheType::Q4_0
                };
                (floor, kv)
            }
        };

    let (batch_size, ubatch_size) = batch_params(model);
    let parallel_slots = parallel_slots(options.policy, context_size);
    let mlock = mlock_allowed(model, total_ram_gb);

    let hidden = hidden_size_bucket(model);
    let estimated_vram_gb = weight_vram_gb
        + kv_bytes_gb(gpu_layers, hidden, context_size, kv_cache_type).min(vram_headroom_gb + weight_vram_gb)
        + VRAM_RESERVE_GB * GB;

    let gpu_layers = if gpu_layers >= total_layers {
        GpuLayers::All
    } else {
        GpuLayers::Count(gpu_layers)
    };

    Ok(Plan {
        context_size,
        gpu_layers,
        kv_cache_type,
        batch_size,
        ubatch_size,
        parallel_slots,
        mlock,
        estimated_vram_gb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_probe::{Backend, GpuInfo};
    use std::path::PathBuf;

    fn model(size_gb: f64, layers: u32, context_length: u32) -> ModelRecord {
        ModelRecord {
            path: PathBuf::from("/m/test.gguf"),
            display_name: "test".to_string(),
            size_gb,
            quantization: "Q4_K_M".to_string(),
            context_length,
            layer_count: layers,
            sliding_window_size: 0,
            embedding_dim: 4096,
            is_instruct: true,
            is_draft: false,
            is_embedding: false,
            is_projector: false,
            is_moe: false,
            is_split_primary: false,
            architecture: "llama".to_string(),
            pooling_type: None,
            split_parts: vec![PathBuf::from("/m/test.gguf")],
        }
    }

    fn snapshot(vram_gb: f64, ram_gb: f64) -> SystemSnapshot {
        SystemSnapshot {
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            cpu_logical: 16,
            cpu_physical: 8,
            total_ram_gb: ram_gb,
            available_ram_gb: ram_gb * 0.8,
            gpus: vec![GpuInfo {
                index: 0,
                vendor_tag: Backend::Cuda,
                name: "test gpu".to_string(),
                total_vram_gb: vram_gb,
                free_vram_gb: vram_gb,
            }],
            backends: vec![Backend::Cuda, Backend::Cpu],
        }
    }

    #[test]
    fn small_model_on_big_gpu_gets_full_offload_and_large_context() {
        let m = model(7.0, 32, 131072);
        let snap = snapshot(24.0, 64.0);
        let result = plan(&m, &snap, &PlannerOptions::default()).unwrap();
        assert_eq!(result.gpu_layers, GpuLayers::All);
        assert!(result.context_size >= 16384);
    }

    #[test]
    fn context_floor_invariant_holds_or_cmax_is_smaller() {
        let m = model(7.0, 32, 8192);
        let snap = snapshot(4.0, 16.0);
        let result = plan(&m, &snap, &PlannerOptions::default()).unwrap();
        assert!(result.context_size >= 16384 || m.context_length < 16384);
    }

    #[test]
    fn context_size_never_exceeds_the_models_own_cmax() {
        // Ample VRAM would otherwise climb the GPU-only ladder to 131072;
        // the model's own max context must truncate it first (§4.D step 3).
        let m = model(7.0, 32, 24576);
        let snap = snapshot(64.0, 64.0);
        let result = plan(&m, &snap, &PlannerOptions::default()).unwrap();
        assert_eq!(result.context_size, 24576);
    }

    #[test]
    fn predicted_vram_never_exceeds_available_minus_reserve() {
        let m = model(13.0, 40, 32768);
        let snap = snapshot(12.0, 32.0);
        let result = plan(&m, &snap, &PlannerOptions::default()).unwrap();
        assert!(result.estimated_vram_gb <= snap.free_vram_gb());
    }

    #[test]
    fn oversized_model_is_rejected() {
        let m = model(200.0, 80, 32768);
        let snap = snapshot(8.0, 16.0);
        let err = plan(&m, &snap, &PlannerOptions::default()).unwrap_err();
        assert!(matches!(err, PlannerError::ModelTooLarge { .. }));
    }

    #[test]
    fn max_speed_policy_always_offloads_everything() {
        let m = model(40.0, 60, 32768);
        let snap = snapshot(8.0, 32.0);
        let result = plan(
            &m,
            &snap,
            &PlannerOptions {
                policy: Policy::MaxSpeed,
                ..PlannerOptions::default()
            },
        )
        .unwrap();
        assert_eq!(result.gpu_layers, GpuLayers::All);
    }

    #[test]
    fn deployment_policy_widens_parallel_slots_when_context_allows() {
        let m = model(7.0, 32, 131072);
        let snap = snapshot(24.0, 64.0);
        let result = plan(
            &m,
            &snap,
            &PlannerOptions {
                policy: Policy::Deployment,
                ..PlannerOptions::default()
            },
        )
        .unwrap();
        assert!(result.parallel_slots >= 1);
        assert!(result.context_size / result.parallel_slots >= 8000 || result.parallel_slots == 1);
    }

    #[test]
    fn mlock_denied_for_large_generative_model() {
        let m = model(12.0, 40, 32768);
        let snap = snapshot(24.0, 64.0);
        let result = plan(&m, &snap, &PlannerOptions::default()).unwrap();
        assert!(!result.mlock);
    }
}
