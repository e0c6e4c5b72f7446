//! Per-vendor GPU detection. Each function is independent and absence or
//! failure of its tool/library returns `None` rather than erroring — the
//! overall probe degrades to CPU-only rather than failing outright.

use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::types::{Backend, GpuInfo};

/// Run `cmd` off-thread and give up after `timeout`, so a hung vendor tool
/// can never stall the overall probe.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let output = cmd.stdout(Stdio::piped()).stderr(Stdio::null()).output();
        let _ = tx.send(output);
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!(error = %e, "probe tool invocation failed");
            None
        }
        Err(_) => {
            warn!("probe tool timed out");
            None
        }
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// NVIDIA, via `nvidia-smi --query-gpu=... --format=csv`.
pub fn detect_cuda() -> Vec<GpuInfo> {
    let mut cmd = Command::new("nvidia-smi");
    cmd.args([
        "--query-gpu=index,name,memory.total,memory.free",
        "--format=csv,noheader,nounits",
    ]);
    let Some(csv) = run_with_timeout(cmd, PROBE_TIMEOUT) else {
        return Vec::new();
    };

    csv.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 4 {
                return None;
            }
            let index: usize = parts[0].parse().ok()?;
            let total_mb: f64 = parts[2].parse().ok()?;
            let free_mb: f64 = parts[3].parse().ok()?;
            Some(GpuInfo {
                index,
                vendor_tag: Backend::Cuda,
                name: parts[1].to_string(),
                total_vram_gb: total_mb / 1024.0,
                free_vram_gb: free_mb / 1024.0,
            })
        })
        .collect()
}

/// AMD, via `rocm-smi --showmeminfo vram --json`.
pub fn detect_rocm() -> Vec<GpuInfo> {
    let mut cmd = Command::new("rocm-smi");
    cmd.args(["--showmeminfo", "vram", "--json"]);
    let Some(raw) = run_with_timeout(cmd, PROBE_TIMEOUT) else {
        return Vec::new();
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return Vec::new();
    };
    let Some(map) = json.as_object() else {
        return Vec::new();
    };

    let mut gpus = Vec::new();
    for (key, value) in map {
        let Some(index) = key
            .trim_start_matches("card")
            .parse::<usize>()
            .ok()
            .or(Some(gpus.len()))
        else {
            continue;
        };
        let total_bytes = value
            .get("VRAM Total Memory (B)")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let used_bytes = value
            .get("VRAM Total Used Memory (B)")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let total_gb = total_bytes / 1024.0 / 1024.0 / 1024.0;
        let free_gb = (total_bytes - used_bytes).max(0.0) / 1024.0 / 1024.0 / 1024.0;
        gpus.push(GpuInfo {
            index,
            vendor_tag: Backend::Rocm,
            name: format!("ROCm device {key}"),
            total_vram_gb: total_gb,
            free_vram_gb: free_gb,
        });
    }
    gpus
}

/// Apple Metal/MLX: OS framework presence, unified memory estimated as ~70%
/// of total RAM (the GPU shares system memory rather than owning dedicated VRAM).
pub fn detect_metal(total_ram_gb: f64) -> Vec<GpuInfo> {
    if !cfg!(target_os = "macos") {
        return Vec::new();
    }
    let unified_gb = total_ram_gb * 0.7;
    vec![GpuInfo {
        index: 0,
        vendor_tag: Backend::Metal,
        name: "Apple unified memory GPU".to_string(),
        total_vram_gb: unified_gb,
        free_vram_gb: unified_gb * 0.9,
    }]
}

/// Intel integrated GPUs: conservative shared-memory estimate, OS-specific.
/// No reliable cross-platform query tool exists, so this only activates on
/// Linux where `/sys/class/drm` exposes an `i915`/`xe` card.
pub fn detect_intel(total_ram_gb: f64) -> Vec<GpuInfo> {
    if !cfg!(target_os = "linux") {
        return Vec::new();
    }
    let Ok(entries) = std::fs::read_dir("/sys/class/drm") else {
        return Vec::new();
    };
    let has_intel = entries.filter_map(|e| e.ok()).any(|e| {
        let driver_link = e.path().join("device/driver");
        std::fs::read_link(&driver_link)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .is_some_and(|driver| driver == "i915" || driver == "xe")
    });
    if !has_intel {
        return Vec::new();
    }
    // Intel iGPUs share system RAM; a conservative slice is reserved for them.
    let shared_gb = (total_ram_gb * 0.25).min(4.0);
    vec![GpuInfo {
        index: 0,
        vendor_tag: Backend::Cpu, // no dedicated VRAM; advertised via the Vulkan/CPU fallback path
        name: "Intel integrated GPU".to_string(),
        total_vram_gb: shared_gb,
        free_vram_gb: shared_gb * 0.8,
    }]
}

/// Vulkan loader presence, as the final GPU-acceleration fallback.
pub fn vulkan_available() -> bool {
    let mut cmd = Command::new("vulkaninfo");
    cmd.arg("--summary");
    if run_with_timeout(cmd, Duration::from_secs(3)).is_some() {
        return true;
    }
    // Fall back to loader presence without invoking vulkaninfo (may be absent
    // even when the loader itself is installed).
    for candidate in [
        "/usr/lib/x86_64-linux-gnu/libvulkan.so.1",
        "/usr/lib/libvulkan.so.1",
        "/usr/lib64/libvulkan.so.1",
    ] {
        if std::path::Path::new(candidate).exists() {
            return true;
        }
    }
    false
}
