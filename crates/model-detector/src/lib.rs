//! Model detector (§4.C): walks a directory tree, groups split files, and
//! classifies each discovered model's role.

pub mod classify;
pub mod projector;
pub mod split;
pub mod types;

pub use types::{DetectorError, IncompleteSplit, ModelRecord, PrimaryRole, ProjectorBinding, ScanReport};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gguf_parser::GgufMetadata;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Default width of the bounded concurrent directory scan (§5).
pub const DEFAULT_SCAN_CONCURRENCY: usize = 10;

fn is_mmproj(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    lower.contains("-mmproj-") || lower.contains("_mmproj_") || lower.contains("mmproj")
}

fn walk_gguf_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk_gguf_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("gguf") {
            out.push(path);
        }
    }
    Ok(())
}

/// One file's worth of scan output, before split grouping.
struct ScannedFile {
    path: PathBuf,
    file_size: u64,
    metadata: GgufMetadata,
}

fn read_file(path: &Path) -> Result<ScannedFile, DetectorError> {
    let file_size = std::fs::metadata(path)?.len();
    let metadata = gguf_parser::read_metadata(path).unwrap_or_default();
    Ok(ScannedFile {
        path: path.to_path_buf(),
        file_size,
        metadata,
    })
}

fn quant_tag(meta: &GgufMetadata) -> String {
    meta.file_type_name().unwrap_or("Unknown").to_string()
}

fn build_record(primary: &ScannedFile, all_parts: Vec<PathBuf>, total_size: u64) -> ModelRecord {
    let filename = primary
        .path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let path_str = primary.path.to_string_lossy().into_owned();
    let classification = classify::classify(&filename, &path_str, &primary.metadata);

    let lower_name = filename.to_lowercase();
    let is_draft = lower_name.contains("draft");
    let is_moe = lower_name.contains("moe") || lower_name.contains("mixtral");

    let display_name = primary
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| filename.trim_end_matches(".gguf").to_string());

    ModelRecord {
        path: primary.path.clone(),
        display_name,
        size_gb: total_size as f64 / 1024.0 / 1024.0 / 1024.0,
        quantization: quant_tag(&primary.metadata),
        context_length: primary.metadata.context_length.unwrap_or(0),
        layer_count: primary.metadata.block_count.unwrap_or(0),
        sliding_window_size: primary.metadata.sliding_window_size.unwrap_or(0),
        embedding_dim: primary.metadata.embedding_length.unwrap_or(0),
        is_instruct: classification.is_instruct && !classification.is_projector,
        is_draft,
        is_embedding: classification.is_embedding,
        is_projector: classification.is_projector,
        is_moe,
        is_split_primary: all_parts.len() > 1,
        architecture: primary
            .metadata
            .architecture
            .clone()
            .unwrap_or_default()
            .to_lowercase(),
        pooling_type: primary.metadata.pooling_type.clone(),
        split_parts: all_parts,
    }
}

/// Group scanned files by split-file membership, reading metadata off the
/// primary (part 1) file only. Returns complete groups plus any incomplete
/// ones (reported, never guessed at — open question #2).
fn group_and_classify(
    files: Vec<ScannedFile>,
) -> (Vec<ModelRecord>, Vec<IncompleteSplit>) {
    let mut by_base: HashMap<String, Vec<(u32, u32, ScannedFile)>> = HashMap::new();
    let mut singles: Vec<ScannedFile> = Vec::new();

    for file in files {
        let filename = file
            .path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let dir_key = file
            .path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        match split::match_split(&filename) {
            Some(m) => {
                let key = format!("{dir_key}/{}", m.base_name);
                by_base.entry(key).or_default().push((m.part, m.total, file));
            }
            None => singles.push(file),
        }
    }

    let mut models = Vec::new();
    let mut incomplete = Vec::new();

    for (_key, mut parts) in by_base {
        parts.sort_by_key(|(part, _, _)| *part);
        // Open question #2: the first part's declared total is ground truth.
        let declared_total = parts[0].1;
        if parts.len() as u32 != declared_total {
            warn!(
                parts = parts.len(),
                declared_total, "incomplete split-file group; excluding from routable set"
            );
            incomplete.push(IncompleteSplit {
                base_name: parts[0].2.path.clone(),
                declared_total,
                observed_parts: parts.iter().map(|(_, _, f)| f.path.clone()).collect(),
            });
            continue;
        }
        let total_size: u64 = parts.iter().map(|(_, _, f)| f.file_size).sum();
        let all_paths: Vec<PathBuf> = parts.iter().map(|(_, _, f)| f.path.clone()).collect();
        models.push(build_record(&parts[0].2, all_paths, total_size));
    }

    for file in singles {
        let size = file.file_size;
        models.push(build_record(&file, vec![file.path.clone()], size));
    }

    models.sort_by(|a, b| a.path.cmp(&b.path));
    (models, incomplete)
}

fn bind_projectors(models: &[ModelRecord]) -> Vec<ProjectorBinding> {
    let main_candidates: Vec<ModelRecord> = models
        .iter()
        .filter(|m| !m.is_projector)
        .cloned()
        .collect();

    models
        .iter()
        .filter(|m| m.is_projector)
        .filter_map(|proj| {
            let all_keys = gguf_parser::read_all_keys(&proj.path).unwrap_or_default();
            let arch = all_keys
                .get("general.architecture")
                .and_then(|v| v.as_str());
            projector::bind_projector(&proj.path, arch, &all_keys, &main_candidates)
        })
        .collect()
}

/// Synchronous directory scan — simplest entry point, used by the CLI.
pub fn scan_directory(dir: &Path) -> Result<ScanReport, DetectorError> {
    let mut paths = Vec::new();
    walk_gguf_files(dir, &mut paths)?;

    let files: Vec<ScannedFile> = paths
        .iter()
        .filter_map(|p| read_file(p).ok())
        .collect();

    let (models, incomplete_splits) = group_and_classify(files);
    let projector_bindings = bind_projectors(&models);

    Ok(ScanReport {
        models,
        projector_bindings,
        incomplete_splits,
    })
}

/// Bounded-concurrency directory scan (§4.C, §5): reads up to
/// `DEFAULT_SCAN_CONCURRENCY` files' GGUF headers at once via
/// `spawn_blocking`. Ordering of the resulting set matches filesystem
/// enumeration order, not completion order.
pub async fn scan_directory_bounded(
    dir: &Path,
    concurrency: usize,
) -> Result<ScanReport, DetectorError> {
    let mut paths = Vec::new();
    walk_gguf_files(dir, &mut paths)?;

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut joins = JoinSet::new();
    for (idx, path) in paths.into_iter().enumerate() {
        let sem = semaphore.clone();
        joins.spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore not closed");
            (idx, tokio::task::spawn_blocking(move || read_file(&path)).await)
        });
    }

    let mut ordered: Vec<Option<ScannedFile>> = Vec::new();
    while let Some(res) = joins.join_next().await {
        let (idx, outcome) = res.expect("scan task panicked");
        if ordered.len() <= idx {
            ordered.resize_with(idx + 1, || None);
        }
        ordered[idx] = outcome.expect("blocking task panicked").ok();
    }

    let files: Vec<ScannedFile> = ordered.into_iter().flatten().collect();
    let (models, incomplete_splits) = group_and_classify(files);
    let projector_bindings = bind_projectors(&models);

    Ok(ScanReport {
        models,
        projector_bindings,
        incomplete_splits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gguf(path: &Path, arch: &str, name: &str) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&gguf_parser::GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());

        fn write_str(buf: &mut Vec<u8>, s: &str) {
            buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        write_str(&mut buf, "general.architecture");
        buf.extend_from_slice(&8u32.to_le_bytes());
        write_str(&mut buf, arch);

        write_str(&mut buf, "general.name");
        buf.extend_from_slice(&8u32.to_le_bytes());
        write_str(&mut buf, name);

        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(&buf).unwrap();
    }

    #[test]
    fn scans_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_gguf(&dir.path().join("Qwen2-7B-Instruct-Q4_K_M.gguf"), "qwen2", "Qwen2 7B Instruct");
        let report = scan_directory(dir.path()).unwrap();
        assert_eq!(report.models.len(), 1);
        assert!(report.models[0].is_instruct);
    }

    #[test]
    fn incomplete_split_group_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write_gguf(&dir.path().join("M-00001-of-00003.gguf"), "llama", "M");
        write_gguf(&dir.path().join("M-00003-of-00003.gguf"), "llama", "M");
        let report = scan_directory(dir.path()).unwrap();
        assert!(report.models.is_empty());
        assert_eq!(report.incomplete_splits.len(), 1);
    }

    #[test]
    fn complete_split_group_emits_one_record_sized_as_sum() {
        let dir = tempfile::tempdir().unwrap();
        for part in 1..=3u32 {
            write_gguf(&dir.path().join(format!("M-{part:05}-of-00003.gguf")), "llama", "M");
        }
        let report = scan_directory(dir.path()).unwrap();
        assert_eq!(report.models.len(), 1);
        assert!(report.models[0].is_split_primary);
        assert_eq!(report.models[0].split_parts.len(), 3);
        assert!(report.models[0].path.ends_with("M-00001-of-00003.gguf"));
    }
}
