//! Role classification rules (§4.C), applied in priority order.

use gguf_parser::GgufMetadata;

const EMBEDDING_ARCHITECTURES: &[&str] = &["bert", "roberta", "nomic-bert", "jina-bert"];
const EMBEDDING_KEYWORDS: &[&str] = &[
    "embed",
    "embedding",
    "minilm",
    "mxbai",
    "bge-",
    "e5-",
    "gte-",
];
const INSTRUCT_KEYWORDS: &[&str] = &["instruct", "chat", "-it", "tools"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Classification {
    pub is_projector: bool,
    pub is_embedding: bool,
    pub is_instruct: bool,
}

/// Classify a model from its filename, full path, and GGUF metadata.
/// Rule order matches §4.C exactly: the first matching rule wins for each
/// concern, with rule 5 able to veto an embedding verdict reached by 2-4.
pub fn classify(filename: &str, path_str: &str, meta: &GgufMetadata) -> Classification {
    let lower_name = filename.to_lowercase();
    let lower_path = path_str.to_lowercase();

    if lower_name.contains("mmproj") {
        return Classification {
            is_projector: true,
            ..Default::default()
        };
    }

    let mut is_embedding = EMBEDDING_KEYWORDS
        .iter()
        .any(|kw| lower_name.contains(kw) || lower_path.contains(kw));

    if !is_embedding
        && let Some(pooling) = meta.pooling_type.as_deref()
        && pooling != "none"
    {
        is_embedding = true;
    }

    let architecture = meta.architecture.as_deref().unwrap_or("").to_lowercase();
    if !is_embedding && EMBEDDING_ARCHITECTURES.contains(&architecture.as_str()) {
        is_embedding = true;
    }

    // Rule 5: vision-capable architectures are never embedding models,
    // regardless of what rules 2-4 concluded.
    if architecture.starts_with("qwen2vl") || architecture.starts_with("llava") || architecture.contains("vision") {
        is_embedding = false;
    }

    let is_instruct = INSTRUCT_KEYWORDS.iter().any(|kw| lower_name.contains(kw));

    Classification {
        is_projector: false,
        is_embedding,
        is_instruct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(arch: Option<&str>, pooling: Option<&str>) -> GgufMetadata {
        GgufMetadata {
            architecture: arch.map(String::from),
            pooling_type: pooling.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn mmproj_is_projector_and_nothing_else() {
        let c = classify("model-mmproj-f16.gguf", "/models/model-mmproj-f16.gguf", &meta(None, None));
        assert!(c.is_projector);
        assert!(!c.is_embedding);
    }

    #[test]
    fn keyword_match_is_embedding() {
        let c = classify("bge-large-en.gguf", "/m/bge-large-en.gguf", &meta(None, None));
        assert!(c.is_embedding);
    }

    #[test]
    fn pooling_type_drives_embedding() {
        let c = classify("some-model.gguf", "/m/some-model.gguf", &meta(Some("llama"), Some("mean")));
        assert!(c.is_embedding);
    }

    #[test]
    fn bert_architecture_is_embedding() {
        let c = classify("anything.gguf", "/m/anything.gguf", &meta(Some("nomic-bert"), None));
        assert!(c.is_embedding);
    }

    #[test]
    fn vision_architecture_overrides_embedding_keyword() {
        // Contrived: filename matches an embedding keyword but the model is
        // a vision-language model, which rule 5 must veto.
        let c = classify("embed-vl-model.gguf", "/m/embed-vl-model.gguf", &meta(Some("qwen2vl"), None));
        assert!(!c.is_embedding);
    }

    #[test]
    fn instruct_keyword_detected() {
        let c = classify("Qwen2-7B-Instruct-Q4_K_M.gguf", "/m/Qwen2-7B-Instruct-Q4_K_M.gguf", &meta(Some("qwen2"), None));
        assert!(c.is_instruct);
        assert!(!c.is_embedding);
    }
}
