//! Data model produced by a directory scan.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single discovered GGUF model, unique by [`ModelRecord::path`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Absolute path; for a split model, the first part.
    pub path: PathBuf,
    pub display_name: String,
    pub size_gb: f64,
    pub quantization: String,
    pub context_length: u32,
    pub layer_count: u32,
    /// 0 if the architecture has no sliding-window attention.
    pub sliding_window_size: u32,
    pub embedding_dim: u32,

    pub is_instruct: bool,
    pub is_draft: bool,
    pub is_embedding: bool,
    pub is_projector: bool,
    pub is_moe: bool,
    pub is_split_primary: bool,

    /// Lowercase architecture tag, e.g. `llama`, `bert`, `qwen2vl`.
    pub architecture: String,
    /// Verbatim pooling tag from metadata, if the architecture declares one.
    pub pooling_type: Option<String>,

    /// All part paths in split order; a single-file model has exactly one.
    pub split_parts: Vec<PathBuf>,
}

impl ModelRecord {
    /// Exactly one of `{embedding, instruct, projector}` is the "primary
    /// role" used to shape config generation (§3 invariant).
    pub fn primary_role(&self) -> PrimaryRole {
        if self.is_projector {
            PrimaryRole::Projector
        } else if self.is_embedding {
            PrimaryRole::Embedding
        } else {
            PrimaryRole::Instruct
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryRole {
    Instruct,
    Embedding,
    Projector,
}

/// A projector (`mmproj`) matched to the main model it augments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorBinding {
    pub projector_path: PathBuf,
    pub main_model_path: PathBuf,
    /// 0.0..=1.0. Rule (i)/(ii) score 0.90; rules (iii)/(iv) score the
    /// measured name similarity (both require >= 0.7 to be emitted).
    pub confidence: f64,
}

/// An incomplete split group: fewer files observed than the filenames declare.
#[derive(Debug, Clone)]
pub struct IncompleteSplit {
    pub base_name: PathBuf,
    pub declared_total: u32,
    pub observed_parts: Vec<PathBuf>,
}

/// Outcome of scanning a directory tree.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub models: Vec<ModelRecord>,
    pub projector_bindings: Vec<ProjectorBinding>,
    pub incomplete_splits: Vec<IncompleteSplit>,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gguf read error: {0}")]
    Gguf(#[from] gguf_parser::GGUFError),
}
