//! Config generator (§4.E): turns discovered models plus a hardware
//! snapshot into the structured runtime launch document consumed by the
//! process supervisor and group coordinator.

pub mod modelid;
pub mod pooling;
pub mod types;

pub use types::{GenerateError, GroupConfig, ModelConfig, ModelGenerationError, RuntimeDocument};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use hw_probe::SystemSnapshot;
use mem_planner::{GpuLayers, PlannerOptions};
use model_detector::{ModelRecord, ProjectorBinding, ScanReport};
use tracing::warn;

const LLAMA_SERVER_BASE_MACRO: &str = "llama-server-base";
const LLAMA_EMBED_BASE_MACRO: &str = "llama-embed-base";
const ALL_MODELS_GROUP: &str = "all-models";

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub binary_path: String,
    pub health_check_timeout: u64,
    pub log_level: String,
    pub start_port: u16,
    pub download_dir: String,
    pub min_free_memory_percent: u8,
    pub default_ttl_seconds: u64,
    pub planner: PlannerOptions,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            binary_path: "llama-server".to_string(),
            health_check_timeout: 30,
            log_level: "info".to_string(),
            start_port: 8100,
            download_dir: "downloads".to_string(),
            min_free_memory_percent: 10,
            default_ttl_seconds: 600,
            planner: PlannerOptions::default(),
        }
    }
}

fn projector_for<'a>(
    model: &ModelRecord,
    bindings: &'a [ProjectorBinding],
) -> Option<&'a ProjectorBinding> {
    bindings
        .iter()
        .find(|b| b.main_model_path == model.path)
}

fn build_command(
    options: &GenerateOptions,
    model: &ModelRecord,
    macro_name: &str,
    plan: &mem_planner::Plan,
    projector: Option<&ProjectorBinding>,
) -> String {
    let mut cmd = format!(
        "${{{macro}}} --model {path}",
        macro = macro_name,
        path = model.path.display(),
    );

    if model.is_embedding {
        cmd.push_str(&format!(" --pooling {}", pooling::resolve_pooling(model)));
    } else {
        cmd.push_str(&format!(" --ctx-size {}", plan.context_size));
    }

    cmd.push_str(&format!(" -ngl {}", plan.gpu_layers.as_ngl_value()));
    cmd.push_str(&format!(
        " --cache-type-k {kv} --cache-type-v {kv}",
        kv = plan.kv_cache_type.as_flag()
    ));
    cmd.push_str(&format!(
        " --batch-size {} --ubatch-size {}",
        plan.batch_size, plan.ubatch_size
    ));
    if plan.parallel_slots > 1 {
        cmd.push_str(&format!(" --parallel {}", plan.parallel_slots));
    }
    if plan.mlock {
        cmd.push_str(" --mlock");
    }
    if let Some(binding) = projector {
        cmd.push_str(&format!(" --mmproj {}", binding.projector_path.display()));
    }

    let _ = &options.binary_path;
    cmd
}

/// Generate a [`RuntimeDocument`] from a scan report and hardware snapshot.
/// One bad model's planner failure is recorded and skipped rather than
/// aborting the whole batch (§7 propagation policy).
pub fn generate(
    scan: &ScanReport,
    snapshot: &SystemSnapshot,
    options: &GenerateOptions,
) -> (RuntimeDocument, Vec<ModelGenerationError>) {
    let mut macros = BTreeMap::new();
    macros.insert(
        LLAMA_SERVER_BASE_MACRO.to_string(),
        format!("{} --host 127.0.0.1 --port ${{PORT}}", options.binary_path),
    );
    macros.insert(
        LLAMA_EMBED_BASE_MACRO.to_string(),
        format!(
            "{} --host 127.0.0.1 --port ${{PORT}} --embedding",
            options.binary_path
        ),
    );

    let mut models = BTreeMap::new();
    let mut errors = Vec::new();
    let mut seen_ids: HashMap<String, u32> = HashMap::new();
    let mut member_ids = Vec::new();

    for record in &scan.models {
        if record.is_draft || record.is_projector {
            // Draft models are never routed independently (§ glossary);
            // projectors are excluded from the routable set (§4.C rule 1)
            // but still consumed via `scan.projector_bindings` / `--mmproj`.
            continue;
        }
        let plan = match mem_planner::plan(record, snapshot, &options.planner) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(path = %record.path.display(), error = %err, "skipping model: planner failed");
                errors.push(ModelGenerationError {
                    path: record.path.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let model_id = modelid::generate_model_id(record, &mut seen_ids);
        let macro_name = if record.is_embedding {
            LLAMA_EMBED_BASE_MACRO
        } else {
            LLAMA_SERVER_BASE_MACRO
        };
        let projector = projector_for(record, &scan.projector_bindings);
        let cmd = build_command(options, record, macro_name, &plan, projector);

        let gpu_layers = match plan.gpu_layers {
            GpuLayers::All => "all".to_string(),
            GpuLayers::Count(n) => n.to_string(),
        };

        models.insert(
            model_id.clone(),
            ModelConfig {
                name: record.display_name.clone(),
                description: format!("{} ({})", record.display_name, record.quantization),
                cmd,
                proxy: "http://127.0.0.1:${PORT}".to_string(),
                ttl: options.default_ttl_seconds,
                env: HashMap::new(),
                aliases: Vec::new(),
                context_size: plan.context_size,
                gpu_layers,
                kv_cache_type: plan.kv_cache_type.as_flag().to_string(),
                batch_size: plan.batch_size,
                ubatch_size: plan.ubatch_size,
            },
        );
        member_ids.push(model_id);
    }

    let mut groups = BTreeMap::new();
    groups.insert(
        ALL_MODELS_GROUP.to_string(),
        GroupConfig {
            members: member_ids,
            exclusive: false,
            swap: false,
            persistent: false,
            start_port: options.start_port,
        },
    );

    let doc = RuntimeDocument {
        health_check_timeout: options.health_check_timeout,
        log_level: options.log_level.clone(),
        start_port: options.start_port,
        download_dir: options.download_dir.clone(),
        min_free_memory_percent: options.min_free_memory_percent,
        macros,
        models,
        groups,
    };

    (doc, errors)
}

/// Serialize a [`RuntimeDocument`] to YAML with a leading timestamp comment.
/// Running this twice over an unchanged document is byte-identical apart
/// from that one comment line (§4.E idempotence).
pub fn to_yaml(doc: &RuntimeDocument, generated_at: &chrono::DateTime<chrono::Utc>) -> Result<String, GenerateError> {
    let body = serde_yaml::to_string(doc)?;
    Ok(format!(
        "# generated at {}\n{}",
        generated_at.to_rfc3339(),
        body
    ))
}

/// Serialize and write to `path`, atomically via a temp-file rename.
pub fn write_to_file(
    doc: &RuntimeDocument,
    generated_at: &chrono::DateTime<chrono::Utc>,
    path: &Path,
) -> Result<(), std::io::Error> {
    let yaml = to_yaml(doc, generated_at).map_err(std::io::Error::other)?;
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, yaml)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_probe::{Backend, GpuInfo};
    use std::path::PathBuf;

    fn snapshot() -> SystemSnapshot {
        SystemSnapshot {
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            cpu_logical: 16,
            cpu_physical: 8,
            total_ram_gb: 32.0,
            available_ram_gb: 28.0,
            gpus: vec![GpuInfo {
                index: 0,
                vendor_tag: Backend::Cuda,
                name: "test".to_string(),
                total_vram_gb: 12.0,
                free_vram_gb: 12.0,
            }],
            backends: vec![Backend::Cuda, Backend::Cpu],
        }
    }

    fn record(size_gb: f64, layers: u32) -> ModelRecord {
        ModelRecord {
            path: PathBuf::from("/models/Qwen2-7B-Instruct-Q4_K_M.gguf"),
            display_name: "Qwen2 7B Instruct".to_string(),
            size_gb,
            quantization: "Q4_K_M".to_string(),
            context_length: 32768,
            layer_count: layers,
            sliding_window_size: 0,
            embedding_dim: 4096,
            is_instruct: true,
            is_draft: false,
            is_embedding: false,
            is_projector: false,
            is_moe: false,
            is_split_primary: false,
            architecture: "qwen2".to_string(),
            pooling_type: None,
            split_parts: vec![PathBuf::from("/models/Qwen2-7B-Instruct-Q4_K_M.gguf")],
        }
    }

    #[test]
    fn generates_one_model_and_all_models_group() {
        let scan = ScanReport {
            models: vec![record(5.0, 32)],
            projector_bindings: vec![],
            incomplete_splits: vec![],
        };
        let (doc, errors) = generate(&scan, &snapshot(), &GenerateOptions::default());
        assert!(errors.is_empty());
        assert_eq!(doc.models.len(), 1);
        assert!(doc.models.contains_key("qwen2-7b-instruct-7b"));
        let group = doc.groups.get(ALL_MODELS_GROUP).unwrap();
        assert_eq!(group.members, vec!["qwen2-7b-instruct-7b".to_string()]);
    }

    #[test]
    fn draft_models_are_skipped() {
        let mut draft = record(1.0, 16);
        draft.is_draft = true;
        let scan = ScanReport {
            models: vec![draft],
            projector_bindings: vec![],
            incomplete_splits: vec![],
        };
        let (doc, _) = generate(&scan, &snapshot(), &GenerateOptions::default());
        assert!(doc.models.is_empty());
    }

    #[test]
    fn projector_models_are_excluded_from_the_routable_set() {
        let mut mmproj = record(1.0, 0);
        mmproj.is_projector = true;
        let scan = ScanReport {
            models: vec![record(5.0, 32), mmproj],
            projector_bindings: vec![],
            incomplete_splits: vec![],
        };
        let (doc, _) = generate(&scan, &snapshot(), &GenerateOptions::default());
        assert_eq!(doc.models.len(), 1);
        assert!(doc.models.contains_key("qwen2-7b-instruct-7b"));
    }

    #[test]
    fn generation_is_idempotent_modulo_timestamp() {
        let scan = ScanReport {
            models: vec![record(5.0, 32)],
            projector_bindings: vec![],
            incomplete_splits: vec![],
        };
        let (doc, _) = generate(&scan, &snapshot(), &GenerateOptions::default());
        let t1 = chrono::DateTime::<chrono::Utc>::from_timestamp(1000, 0).unwrap();
        let t2 = chrono::DateTime::<chrono::Utc>::from_timestamp(2000, 0).unwrap();
        let a = to_yaml(&doc, &t1).unwrap();
        let b = to_yaml(&doc, &t2).unwrap();
        let a_body: String = a.lines().skip(1).collect::<Vec<_>>().join("\n");
        let b_body: String = b.lines().skip(1).collect::<Vec<_>>().join("\n");
        assert_eq!(a_body, b_body);
    }

    #[test]
    fn oversized_model_is_skipped_not_fatal() {
        let scan = ScanReport {
            models: vec![record(500.0, 80)],
            projector_bindings: vec![],
            incomplete_splits: vec![],
        };
        let (doc, errors) = generate(&scan, &snapshot(), &GenerateOptions::default());
        assert!(doc.models.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
