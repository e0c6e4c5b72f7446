//! Pooling-type override for embedding models (§4.E).

use model_detector::ModelRecord;

/// Resolve the `--pooling` flag for an embedding model: metadata wins
/// verbatim when present, otherwise family heuristics by name.
pub fn resolve_pooling(model: &ModelRecord) -> String {
    if let Some(tag) = &model.pooling_type {
        if !tag.is_empty() && tag != "none" {
            return tag.clone();
        }
    }

    let lower = model.display_name.to_lowercase();
    if lower.contains("bge") {
        return "cls".to_string();
    }
    if lower.contains("jina") {
        if lower.contains("v2") || lower.contains("v3") {
            return "last".to_string();
        }
        return "cls".to_string();
    }
    "mean".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn model(display_name: &str, pooling_type: Option<&str>) -> ModelRecord {
        ModelRecord {
            path: PathBuf::from("/m/x.gguf"),
            display_name: display_name.to_string(),
            size_gb: 1.0,
            quantization: "F16".to_string(),
            context_length: 512,
            layer_count: 12,
            sliding_window_size: 0,
            embedding_dim: 768,
            is_instruct: false,
            is_draft: false,
            is_embedding: true,
            is_projector: false,
            is_moe: false,
            is_split_primary: false,
            architecture: "bert".to_string(),
            pooling_type: pooling_type.map(str::to_string),
            split_parts: vec![PathBuf::from("/m/x.gguf")],
        }
    }

    #[test]
    fn metadata_pooling_wins_verbatim() {
        assert_eq!(resolve_pooling(&model("some-embedder", Some("mean"))), "mean");
    }

    #[test]
    fn bge_defaults_to_cls() {
        assert_eq!(resolve_pooling(&model("bge-large-en", None)), "cls");
    }

    #[test]
    fn jina_v3_defaults_to_last() {
        assert_eq!(resolve_pooling(&model("jina-embeddings-v3", None)), "last");
    }

    #[test]
    fn jina_v1_defaults_to_cls() {
        assert_eq!(resolve_pooling(&model("jina-embeddings-v1", None)), "cls");
    }

    #[test]
    fn unknown_family_defaults_to_mean() {
        assert_eq!(resolve_pooling(&model("mxbai-embed-large", None)), "mean");
    }
}
