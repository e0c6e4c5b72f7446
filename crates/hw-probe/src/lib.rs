//! Best-effort, deterministic hardware and GPU-backend detection.
//!
//! [`probe`] builds a one-shot [`SystemSnapshot`]; [`refresh_available`] is
//! the cheaper realtime entry point that only re-reads *available* RAM/VRAM
//! figures. Every vendor-specific backend degrades to an empty result rather
//! than erroring, so a host with no GPU tooling installed still produces a
//! valid CPU-only snapshot.

pub mod backends;
pub mod types;

pub use types::{AvailableResources, Backend, GpuInfo, ProbeError, ProbeOverrides, SystemSnapshot};

use sysinfo::System;
use tracing::debug;

/// Available VRAM is scaled down by this factor when a live refresh fails
/// and we fall back to the last known static total.
const VRAM_AVAILABILITY_FALLBACK: f64 = 0.9;
/// Same, for RAM.
const RAM_AVAILABILITY_FALLBACK: f64 = 0.75;

/// Take a full hardware snapshot, honoring any caller-forced overrides.
pub fn probe(overrides: &ProbeOverrides) -> SystemSnapshot {
    let mut sys = System::new_all();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let total_ram_gb = overrides
        .ram_gb
        .unwrap_or_else(|| sys.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0);
    let available_ram_gb = (sys.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0)
        .min(total_ram_gb)
        .max(0.0);

    let cpu_logical = sys.cpus().len();
    let cpu_physical = System::physical_core_count().unwrap_or(cpu_logical.max(1));

    let mut gpus = Vec::new();
    gpus.extend(backends::detect_cuda());
    gpus.extend(backends::detect_rocm());
    gpus.extend(backends::detect_metal(total_ram_gb));
    gpus.extend(backends::detect_intel(total_ram_gb));

    if let Some(vram_gb) = overrides.vram_gb {
        if let Some(first) = gpus.first_mut() {
            first.total_vram_gb = vram_gb;
            first.free_vram_gb = vram_gb;
        } else {
            gpus.push(GpuInfo {
                index: 0,
                vendor_tag: overrides.backend.unwrap_or(Backend::Cpu),
                name: "forced override".to_string(),
                total_vram_gb: vram_gb,
                free_vram_gb: vram_gb,
            });
        }
    }

    let mut backend_order: Vec<Backend> = Vec::new();
    if let Some(forced) = overrides.backend {
        backend_order.push(forced);
    } else {
        if gpus.iter().any(|g| g.vendor_tag == Backend::Cuda) {
            backend_order.push(Backend::Cuda);
        }
        if gpus.iter().any(|g| g.vendor_tag == Backend::Rocm) {
            backend_order.push(Backend::Rocm);
        }
        if gpus.iter().any(|g| g.vendor_tag == Backend::Metal) {
            backend_order.push(Backend::Metal);
        }
        if backends::vulkan_available() {
            backend_order.push(Backend::Vulkan);
        }
    }
    backend_order.push(Backend::Cpu);
    backend_order.dedup();

    let snapshot = SystemSnapshot {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_logical,
        cpu_physical,
        total_ram_gb,
        available_ram_gb,
        gpus,
        backends: backend_order,
    };

    debug!(
        os = %snapshot.os,
        gpus = snapshot.gpus.len(),
        total_vram_gb = snapshot.total_vram_gb(),
        "hardware probe complete"
    );

    snapshot
}

/// Re-read just the *available* RAM/VRAM. Falls back to the static totals
/// captured in `snapshot`, scaled by a conservative availability factor,
/// if the live read fails.
pub fn refresh_available(snapshot: &SystemSnapshot) -> AvailableResources {
    let mut sys = System::new();
    sys.refresh_memory();
    let live_ram = sys.available_memory();

    let available_ram_gb = if live_ram > 0 {
        (live_ram as f64 / 1024.0 / 1024.0 / 1024.0).min(snapshot.total_ram_gb)
    } else {
        snapshot.total_ram_gb * RAM_AVAILABILITY_FALLBACK
    };

    let live_vram: f64 = backends::detect_cuda()
        .into_iter()
        .chain(backends::detect_rocm())
        .map(|g| g.free_vram_gb)
        .sum();

    let available_vram_gb = if live_vram > 0.0 {
        live_vram
    } else {
        snapshot.total_vram_gb() * VRAM_AVAILABILITY_FALLBACK
    };

    AvailableResources {
        available_ram_gb,
        available_vram_gb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_always_includes_cpu_backend() {
        let snapshot = probe(&ProbeOverrides::default());
        assert!(snapshot.backends.contains(&Backend::Cpu));
        assert!(snapshot.cpu_logical >= 1);
    }

    #[test]
    fn overrides_are_reflected_unchanged() {
        let overrides = ProbeOverrides {
            backend: Some(Backend::Vulkan),
            ram_gb: Some(64.0),
            vram_gb: Some(12.0),
        };
        let snapshot = probe(&overrides);
        assert_eq!(snapshot.total_ram_gb, 64.0);
        assert_eq!(snapshot.backends.first(), Some(&Backend::Vulkan));
        assert_eq!(snapshot.gpus.first().map(|g| g.total_vram_gb), Some(12.0));
    }

    #[test]
    fn refresh_never_exceeds_total() {
        let snapshot = probe(&ProbeOverrides {
            ram_gb: Some(16.0),
            ..Default::default()
        });
        let avail = refresh_available(&snapshot);
        assert!(avail.available_ram_gb <= snapshot.total_ram_gb);
    }
}
