//! Release-tag resolution and archive-URL composition (§4.F).

use hw_probe::Backend;
use tracing::warn;

const RELEASES_ENDPOINT: &str = "https://api.github.com/repos/ggml-org/llama.cpp/releases/latest";

/// Resolve the latest release tag via a short-timeout HTTPS call, falling
/// back to the compile-time default if the endpoint can't be reached in
/// time.
pub async fn resolve_latest_version(timeout_secs: u64, fallback: &str) -> String {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
    {
        Ok(c) => c,
        Err(_) => return fallback.to_string(),
    };

    let result = client
        .get(RELEASES_ENDPOINT)
        .header("User-Agent", "binary-provisioner")
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match result {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("tag_name")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| fallback.to_string()),
            Err(err) => {
                warn!(error = %err, "release tag response was not valid JSON, using fallback version");
                fallback.to_string()
            }
        },
        Err(err) => {
            warn!(error = %err, "release tag endpoint unreachable, using fallback version");
            fallback.to_string()
        }
    }
}

fn backend_archive_tag(backend: Backend) -> &'static str {
    match backend {
        Backend::Cuda => "cuda",
        Backend::Rocm => "rocm",
        Backend::Vulkan => "vulkan",
        Backend::Metal => "",
        Backend::Cpu => "",
    }
}

/// Compose the archive download URL for `(os, arch, backend, version)`.
pub fn archive_url(os: &str, arch: &str, backend: Backend, version: &str) -> String {
    let os_tag = match os {
        "windows" => "win",
        "macos" => "macos",
        _ => "ubuntu",
    };
    let backend_tag = backend_archive_tag(backend);
    let name = if backend_tag.is_empty() {
        format!("llama-{version}-bin-{os_tag}-{arch}.zip")
    } else {
        format!("llama-{version}-bin-{os_tag}-{backend_tag}-{arch}.zip")
    };
    format!(
        "https://github.com/ggml-org/llama.cpp/releases/download/{version}/{name}"
    )
}

/// The fallback chain a missing archive steps down through, per backend.
pub fn fallback_chain(backend: Backend) -> &'static [Backend] {
    match backend {
        Backend::Cuda => &[Backend::Cuda, Backend::Vulkan, Backend::Cpu],
        Backend::Rocm => &[Backend::Rocm, Backend::Vulkan, Backend::Cpu],
        Backend::Vulkan => &[Backend::Vulkan, Backend::Cpu],
        Backend::Metal => &[Backend::Metal, Backend::Cpu],
        Backend::Cpu => &[Backend::Cpu],
    }
}

/// HEAD-probe `url`; a non-2xx/3xx or network failure is treated as "missing".
pub async fn url_exists(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    client
        .head(url)
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_cuda_url_with_backend_tag() {
        let url = archive_url("linux", "x64", Backend::Cuda, "b4500");
        assert!(url.contains("cuda"));
        assert!(url.ends_with(".zip"));
    }

    #[test]
    fn cpu_url_omits_backend_tag() {
        let url = archive_url("linux", "x64", Backend::Cpu, "b4500");
        assert!(!url.contains("-cpu-"));
    }

    #[test]
    fn cuda_fallback_chain_steps_through_vulkan_then_cpu() {
        assert_eq!(
            fallback_chain(Backend::Cuda),
            &[Backend::Cuda, Backend::Vulkan, Backend::Cpu]
        );
    }
}
