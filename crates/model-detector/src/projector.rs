//! Projector (`mmproj`)-to-main-model matching (§4.C).

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use gguf_parser::GGUFValue;
use regex::Regex;

use crate::types::{ModelRecord, ProjectorBinding};

const SIMILARITY_THRESHOLD: f64 = 0.7;
const STRONG_MATCH_CONFIDENCE: f64 = 0.90;

static SIZE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)b").unwrap());

fn extract_size_b(name: &str) -> Option<f64> {
    SIZE_TAG
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Does a projector's vision-projection dimension plausibly match a main
/// model's declared size? Unknown dimensions are never rejected — only
/// *obvious* mismatches against the known buckets are.
fn size_compatible(projection_dim: u32, main_size_b: f64) -> bool {
    match projection_dim {
        5376 => main_size_b >= 20.0,
        3584 => (7.0..=9.0).contains(&main_size_b),
        2560 => (2.0..=4.0).contains(&main_size_b),
        _ => true,
    }
}

fn stem_lower(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase()
}

fn base_model_name(stem: &str) -> String {
    stem.trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches(['-', '_'])
        .replace("mmproj", "")
        .replace("f16", "")
        .replace("f32", "")
        .trim_matches(['-', '_'])
        .to_string()
}

/// Attempt to bind a projector file to the best-matching main model among
/// `candidates`, trying the four rules in order and returning the first
/// that clears its threshold.
pub fn bind_projector(
    projector_path: &Path,
    projector_arch: Option<&str>,
    projector_keys: &HashMap<String, GGUFValue>,
    candidates: &[ModelRecord],
) -> Option<ProjectorBinding> {
    let projector_stem = stem_lower(projector_path);
    let projection_dim = projector_keys
        .get("clip.vision.projection_dim")
        .and_then(|v| v.as_u32());

    // (i) architecture-equal AND size-compatible.
    if let (Some(arch), Some(dim)) = (projector_arch, projection_dim) {
        for candidate in candidates {
            if !candidate.architecture.eq_ignore_ascii_case(arch) {
                continue;
            }
            let Some(size_b) = extract_size_b(&candidate.display_name)
                .or_else(|| extract_size_b(&stem_lower(&candidate.path)))
            else {
                continue;
            };
            if size_compatible(dim, size_b) {
                return Some(ProjectorBinding {
                    projector_path: projector_path.to_path_buf(),
                    main_model_path: candidate.path.clone(),
                    confidence: STRONG_MATCH_CONFIDENCE,
                });
            }
        }
    }

    // (ii) basename equal (projector name minus mmproj markers).
    let projector_base = base_model_name(&projector_stem);
    for candidate in candidates {
        let candidate_stem = stem_lower(&candidate.path);
        if candidate_stem == projector_base {
            return Some(ProjectorBinding {
                projector_path: projector_path.to_path_buf(),
                main_model_path: candidate.path.clone(),
                confidence: STRONG_MATCH_CONFIDENCE,
            });
        }
    }

    // (iii) whole-name similarity.
    let mut best: Option<(f64, &ModelRecord)> = None;
    for candidate in candidates {
        let candidate_stem = stem_lower(&candidate.path);
        let score = strsim::jaro_winkler(&projector_stem, &candidate_stem);
        if score >= SIMILARITY_THRESHOLD && best.is_none_or(|(b, _)| score > b) {
            best = Some((score, candidate));
        }
    }
    if let Some((score, candidate)) = best {
        return Some(ProjectorBinding {
            projector_path: projector_path.to_path_buf(),
            main_model_path: candidate.path.clone(),
            confidence: score,
        });
    }

    // (iv) base-model-name similarity (quantization/mmproj suffixes stripped).
    let mut best: Option<(f64, &ModelRecord)> = None;
    for candidate in candidates {
        let candidate_base = base_model_name(&stem_lower(&candidate.path));
        let score = strsim::jaro_winkler(&projector_base, &candidate_base);
        if score >= SIMILARITY_THRESHOLD && best.is_none_or(|(b, _)| score > b) {
            best = Some((score, candidate));
        }
    }
    best.map(|(score, candidate)| ProjectorBinding {
        projector_path: projector_path.to_path_buf(),
        main_model_path: candidate.path.clone(),
        confidence: score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(path: &str, arch: &str, name: &str) -> ModelRecord {
        ModelRecord {
            path: PathBuf::from(path),
            display_name: name.to_string(),
            size_gb: 4.0,
            quantization: "Q4_K_M".to_string(),
            context_length: 32768,
            layer_count: 32,
            sliding_window_size: 0,
            embedding_dim: 0,
            is_instruct: true,
            is_draft: false,
            is_embedding: false,
            is_projector: false,
            is_moe: false,
            is_split_primary: false,
            architecture: arch.to_string(),
            pooling_type: None,
            split_parts: vec![PathBuf::from(path)],
        }
    }

    #[test]
    fn basename_match_wins() {
        let candidates = vec![record("/m/llava-7b.gguf", "llava", "llava-7b")];
        let binding = bind_projector(
            Path::new("/m/llava-7b-mmproj.gguf"),
            None,
            &HashMap::new(),
            &candidates,
        )
        .unwrap();
        assert_eq!(binding.main_model_path, PathBuf::from("/m/llava-7b.gguf"));
        assert_eq!(binding.confidence, 0.90);
    }

    #[test]
    fn architecture_and_size_match() {
        let mut keys = HashMap::new();
        keys.insert(
            "clip.vision.projection_dim".to_string(),
            GGUFValue::Uint32(3584),
        );
        let candidates = vec![record("/m/some-random-name-8b.gguf", "llava", "some-random-name-8b")];
        let binding = bind_projector(
            Path::new("/m/totally-different-mmproj.gguf"),
            Some("llava"),
            &keys,
            &candidates,
        )
        .unwrap();
        assert_eq!(binding.confidence, 0.90);
    }

    #[test]
    fn no_match_below_threshold() {
        let candidates = vec![record("/m/zzz-completely-unrelated.gguf", "llama", "zzz")];
        let binding = bind_projector(
            Path::new("/m/aaaa-mmproj.gguf"),
            None,
            &HashMap::new(),
            &candidates,
        );
        assert!(binding.is_none());
    }
}
