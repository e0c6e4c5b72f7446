//! Archive download and extraction (§4.F).

use std::path::{Path, PathBuf};

use crate::types::ProvisionError;

/// Candidate locations (relative to the extracted archive root) searched
/// for the inference binary, in order.
const EXECUTABLE_SEARCH_DIRS: &[&str] = &["build/bin", "bin", ""];

fn executable_name() -> &'static str {
    if cfg!(windows) {
        "llama-server.exe"
    } else {
        "llama-server"
    }
}

/// Download `url` to a temp file inside `dest_dir`, streaming the response
/// body without buffering the whole archive in memory.
pub async fn download_archive(url: &str, dest_dir: &Path) -> Result<PathBuf, ProvisionError> {
    std::fs::create_dir_all(dest_dir)?;
    let archive_path = dest_dir.join("download.zip.part");

    let response = reqwest::get(url)
        .await
        .map_err(|e| ProvisionError::DownloadFailed(e.to_string()))?
        .error_for_status()
        .map_err(|e| ProvisionError::DownloadFailed(e.to_string()))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProvisionError::DownloadFailed(e.to_string()))?;
    tokio::fs::write(&archive_path, &bytes).await?;

    Ok(archive_path)
}

/// Extract `archive_path` into `dest_dir`, then locate the inference binary
/// by searching [`EXECUTABLE_SEARCH_DIRS`], chmod'ing it executable on
/// non-Windows platforms.
pub fn extract_and_locate(archive_path: &Path, dest_dir: &Path) -> Result<PathBuf, ProvisionError> {
    std::fs::create_dir_all(dest_dir)?;
    let file = std::fs::File::open(archive_path)
        .map_err(|e| ProvisionError::ExtractFailed(e.to_string()))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ProvisionError::ExtractFailed(e.to_string()))?;
    archive
        .extract(dest_dir)
        .map_err(|e| ProvisionError::ExtractFailed(e.to_string()))?;

    let target_name = executable_name();
    for rel_dir in EXECUTABLE_SEARCH_DIRS {
        let candidate = if rel_dir.is_empty() {
            dest_dir.join(target_name)
        } else {
            dest_dir.join(rel_dir).join(target_name)
        };
        if candidate.is_file() {
            make_executable(&candidate)?;
            return Ok(candidate);
        }
    }

    Err(ProvisionError::ExecutableNotFound)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ProvisionError> {
    Ok(())
}

/// Remove an existing extracted directory, retrying with backoff since a
/// running child may still hold an open file handle on it (most visible on
/// Windows, where that blocks deletion outright).
pub async fn remove_dir_with_retry(dir: &Path, max_attempts: u32) -> Result<(), ProvisionError> {
    if !dir.exists() {
        return Ok(());
    }
    let mut attempt = 0;
    loop {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => return Ok(()),
            Err(err) if attempt + 1 >= max_attempts => return Err(err.into()),
            Err(_) => {
                attempt += 1;
                let backoff_ms = 100 * 2u64.pow(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}
