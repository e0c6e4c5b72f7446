//! Binary provisioner (§4.F): ensures a usable inference-child binary
//! exists under a managed directory, fetching and caching it as needed.

pub mod extract;
pub mod resolver;
pub mod types;

pub use types::{ProvisionError, ProvisionOptions, ProvisionResult, Sidecar};

use hw_probe::{Backend, SystemSnapshot};
use tracing::{info, warn};

const MAX_REMOVE_ATTEMPTS: u32 = 5;

fn sidecar_path(managed_dir: &std::path::Path) -> std::path::PathBuf {
    managed_dir.join("sidecar.json")
}

fn read_sidecar(managed_dir: &std::path::Path) -> Option<Sidecar> {
    let bytes = std::fs::read(sidecar_path(managed_dir)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_sidecar(managed_dir: &std::path::Path, sidecar: &Sidecar) -> Result<(), ProvisionError> {
    let bytes = serde_json::to_vec_pretty(sidecar)
        .map_err(|e| ProvisionError::ExtractFailed(e.to_string()))?;
    std::fs::write(sidecar_path(managed_dir), bytes)?;
    Ok(())
}

/// On CUDA/Windows, the runtime DLL must also be present alongside the
/// binary for a cached sidecar to be trusted.
fn cuda_runtime_present(managed_dir: &std::path::Path) -> bool {
    if !cfg!(windows) {
        return true;
    }
    std::fs::read_dir(managed_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().to_lowercase().contains("cudart"))
        })
        .unwrap_or(false)
}

fn executable_path(managed_dir: &std::path::Path, sidecar: &Sidecar) -> std::path::PathBuf {
    if sidecar.path.is_absolute() {
        sidecar.path.clone()
    } else {
        managed_dir.join(&sidecar.path)
    }
}

/// Ensure a usable inference binary exists, reusing a cached extraction
/// when its sidecar matches the desired `(backend, version)` and, on
/// Windows CUDA builds, the runtime DLL is present.
pub async fn provision(
    snapshot: &SystemSnapshot,
    options: &ProvisionOptions,
) -> Result<ProvisionResult, ProvisionError> {
    let desired_backend = options
        .forced_backend
        .unwrap_or_else(|| snapshot.preferred_backend());

    let version = match &options.version_override {
        Some(v) => v.clone(),
        None => {
            resolver::resolve_latest_version(
                options.resolve_timeout_secs,
                &options.compile_time_default_version,
            )
            .await
        }
    };

    if let Some(sidecar) = read_sidecar(&options.managed_dir) {
        let exe_path = executable_path(&options.managed_dir, &sidecar);
        if sidecar.backend == desired_backend
            && sidecar.version == version
            && exe_path.is_file()
            && (sidecar.backend != Backend::Cuda || cuda_runtime_present(&options.managed_dir))
        {
            info!(backend = %sidecar.backend, version = %version, "reusing cached inference binary");
            return Ok(ProvisionResult {
                executable_path: exe_path,
                resolved_backend: sidecar.backend,
                version,
                reused_existing: true,
            });
        }
    }

    let chain = resolver::fallback_chain(desired_backend);
    let mut last_err = ProvisionError::NoBinaryForPlatform;
    for &candidate_backend in chain {
        let url = resolver::archive_url(&snapshot.os, &snapshot.arch, candidate_backend, &version);
        if !resolver::url_exists(&url).await {
            warn!(backend = %candidate_backend, url, "archive missing for backend, stepping down fallback chain");
            continue;
        }

        extract::remove_dir_with_retry(&options.managed_dir, MAX_REMOVE_ATTEMPTS).await?;

        let archive_path = match extract::download_archive(&url, &options.managed_dir).await {
            Ok(path) => path,
            Err(err) => {
                last_err = err;
                continue;
            }
        };
        let exe_path = match extract::extract_and_locate(&archive_path, &options.managed_dir) {
            Ok(path) => path,
            Err(err) => {
                last_err = err;
                continue;
            }
        };
        let _ = std::fs::remove_file(&archive_path);

        let sidecar = Sidecar {
            backend: candidate_backend,
            version: version.clone(),
            path: exe_path.clone(),
        };
        write_sidecar(&options.managed_dir, &sidecar)?;

        info!(backend = %candidate_backend, version = %version, "provisioned inference binary");
        return Ok(ProvisionResult {
            executable_path: exe_path,
            resolved_backend: candidate_backend,
            version,
            reused_existing: false,
        });
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn snapshot() -> SystemSnapshot {
        SystemSnapshot {
            os: "linux".to_string(),
            arch: "x64".to_string(),
            cpu_logical: 8,
            cpu_physical: 4,
            total_ram_gb: 32.0,
            available_ram_gb: 16.0,
            gpus: vec![],
            backends: vec![Backend::Cpu],
        }
    }

    #[test]
    fn cached_sidecar_matching_backend_and_version_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let exe_path = dir.path().join("llama-server");
        std::fs::write(&exe_path, b"fake binary").unwrap();
        let sidecar = Sidecar {
            backend: Backend::Cpu,
            version: "b4500".to_string(),
            path: exe_path.clone(),
        };
        write_sidecar(dir.path(), &sidecar).unwrap();

        let loaded = read_sidecar(dir.path()).unwrap();
        assert_eq!(loaded, sidecar);
        assert!(executable_path(dir.path(), &loaded).is_file());
    }

    #[test]
    fn missing_sidecar_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_sidecar(dir.path()).is_none());
    }

    #[test]
    fn relative_sidecar_path_resolves_against_managed_dir() {
        let sidecar = Sidecar {
            backend: Backend::Cpu,
            version: "b4500".to_string(),
            path: PathBuf::from("llama-server"),
        };
        let resolved = executable_path(std::path::Path::new("/opt/managed"), &sidecar);
        assert_eq!(resolved, PathBuf::from("/opt/managed/llama-server"));
    }
}
