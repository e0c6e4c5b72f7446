//! `modelId` slug generation with collision-suffix handling (§4.E).

use std::collections::HashMap;

use model_detector::ModelRecord;

fn size_tag(model: &ModelRecord) -> Option<String> {
    let lower = format!("{} {}", model.display_name, model.quantization).to_lowercase();
    let mut digits = String::new();
    let mut chars = lower.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || next == '.' {
                    digits.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek() == Some(&'b') {
                return Some(format!("{digits}b"));
            }
            digits.clear();
        }
    }
    None
}

const QUANT_SUFFIXES: &[&str] = &[
    "q2_k", "q3_k_s", "q3_k_m", "q3_k_l", "q4_0", "q4_1", "q4_k_s", "q4_k_m", "q5_0", "q5_1",
    "q5_k_s", "q5_k_m", "q6_k", "q8_0", "f16", "f32", "bf16",
];

fn slugify(name: &str) -> String {
    let mut slug = name.to_lowercase();
    for ch in ['_', '.', ' '] {
        slug = slug.replace(ch, "-");
    }
    let slug: String = slug
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    let mut parts: Vec<&str> = slug.split('-').filter(|p| !p.is_empty()).collect();
    while let Some(last) = parts.last() {
        if QUANT_SUFFIXES.contains(last) || *last == "gguf" {
            parts.pop();
        } else {
            break;
        }
    }
    parts.join("-")
}

/// Generate a stable, collision-free `modelId` for `model` within the
/// current generation run. `seen` tracks ids already emitted this run and
/// is updated in place.
pub fn generate_model_id(model: &ModelRecord, seen: &mut HashMap<String, u32>) -> String {
    let mut base = slugify(&model.display_name);
    if base.is_empty() {
        base = slugify(
            &model
                .path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy(),
        );
    }
    if let Some(tag) = size_tag(model) {
        if !base.ends_with(&tag) {
            base = format!("{base}-{tag}");
        }
    }

    match seen.get_mut(&base) {
        None => {
            seen.insert(base.clone(), 1);
            base
        }
        Some(count) => {
            *count += 1;
            format!("{base}-v{count}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn model(display_name: &str) -> ModelRecord {
        ModelRecord {
            path: PathBuf::from("/m/x.gguf"),
            display_name: display_name.to_string(),
            size_gb: 4.0,
            quantization: "Q4_K_M".to_string(),
            context_length: 32768,
            layer_count: 32,
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
            split_parts: vec![PathBuf::from("/m/x.gguf")],
        }
    }

    #[test]
    fn strips_quant_and_adds_size_tag() {
        let mut seen = HashMap::new();
        let id = generate_model_id(&model("Qwen2 7B Instruct Q4_K_M"), &mut seen);
        assert_eq!(id, "qwen2-7b-instruct-7b");
    }

    #[test]
    fn collisions_append_version_suffix() {
        let mut seen = HashMap::new();
        let first = generate_model_id(&model("Llama 3 8B"), &mut seen);
        let second = generate_model_id(&model("Llama 3 8B"), &mut seen);
        assert_eq!(first, "llama-3-8b");
        assert_eq!(second, "llama-3-8b-v2");
    }
}
