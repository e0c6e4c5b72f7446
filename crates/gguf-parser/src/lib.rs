//! Pure-Rust GGUF file format parser.
//!
//! Provides fast metadata extraction from `.gguf` files **without**
//! depending on llama.cpp.  Three reading modes are supported:
//!
//! * **quick scan** — bounded read to extract model name, architecture,
//!   quantisation type, context length, etc. for directory listings.
//! * **whitelist metadata read** — streams the whole file but only decodes
//!   the fixed set of keys the planner needs, skipping everything else by
//!   byte width.
//! * **all-keys read** — decodes every KV pair, for diagnostics and
//!   projector matching.
//!
//! **directory scan** recursively discovers all `.gguf` models in a
//! directory tree, grouping split files and detecting mmproj companions.

pub mod reader;
pub mod types;

pub use reader::{
    GgufMetadata, ModelEntry, QuickScanResult, quick_scan, read_all_keys, read_metadata,
    scan_directory,
};
pub use types::{GGUFHeader, GGUFMetadataKV, GGUFValue, GGUFValueType, GGUF_MAGIC, file_type_name};
