//! GGUF file reader.
//!
//! Two reading paths share the same streaming cursor:
//!
//! * [`read_metadata`] — decodes only the fixed whitelist of keys the planner
//!   cares about (4.A), skipping every other value by its exact byte width
//!   without ever materialising it. Architecture-prefixed keys (e.g.
//!   `llama.block_count`) are learned lazily: the whitelist widens the moment
//!   `general.architecture` is observed.
//! * [`read_all_keys`] — the diagnostic path; every key decodes into the
//!   result map. Used for projector matching and `models info`.
//!
//! Both walk the same `kvCount` pairs and must therefore agree on where the
//! cursor lands after each pair.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::*;

/// Bytes read in quick-scan mode before giving up on finding well-known keys.
/// 8 MiB covers virtually all metadata (including large tokenizer arrays)
/// while staying fast (<10ms on modern hardware with OS page cache).
const QUICK_SCAN_LIMIT: u64 = 8 * 1024 * 1024;

//  Public result types

/// The fixed set of keys the memory planner and config generator need,
/// decoded directly off the wire without building the full KV map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GgufMetadata {
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub file_type: Option<u32>,
    pub block_count: Option<u32>,
    pub context_length: Option<u32>,
    pub attention_head_count_kv: Option<u32>,
    pub attention_key_length: Option<u32>,
    pub attention_value_length: Option<u32>,
    pub sliding_window_size: Option<u32>,
    pub pooling_type: Option<String>,
    pub embedding_length: Option<u32>,
    pub tokenizer_model: Option<String>,
    pub chat_template: Option<String>,
}

impl GgufMetadata {
    pub fn file_type_name(&self) -> Option<&'static str> {
        self.file_type.map(file_type_name)
    }
}

/// Outcome of a quick scan on a single `.gguf` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickScanResult {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub header: GGUFHeader,
    pub metadata: GgufMetadata,
}

/// An entry in the model catalogue produced by [`scan_directory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub architecture: Option<String>,
    pub quantization: Option<String>,
    pub context_length: Option<u32>,
    pub is_split: bool,
    pub split_parts: Vec<PathBuf>,
    pub mmproj_path: Option<PathBuf>,
}

//  Whitelist-driven metadata read (4.A)

/// Read the header and the fixed whitelist of metadata keys from `path`.
///
/// Streams through every KV pair; pairs not on the (possibly
/// architecture-extended) whitelist are skipped by their exact encoded byte
/// width rather than decoded, so this stays fast even on files with huge
/// tokenizer-vocabulary arrays.
pub fn read_metadata(path: &Path) -> Result<GgufMetadata, GGUFError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader)?;

    let mut meta = GgufMetadata::default();
    let mut arch_prefix: Option<String> = None;

    for _ in 0..header.metadata_kv_count {
        let key = read_string(&mut reader)?;
        let vtype = GGUFValueType::try_from(read_u32(&mut reader)?)?;

        if key == "general.architecture" {
            let value = read_value(&mut reader, vtype)?;
            if let Some(s) = value.as_str() {
                arch_prefix = Some(s.to_string());
                meta.architecture = Some(s.to_string());
            }
            continue;
        }

        let Some(arch) = arch_prefix.as_deref() else {
            match key.as_str() {
                "general.name" => {
                    if let Some(s) = read_value(&mut reader, vtype)?.as_str() {
                        meta.name = Some(s.to_string());
                    }
                }
                "general.file_type" => {
                    meta.file_type = read_value(&mut reader, vtype)?.as_u32();
                }
                "tokenizer.ggml.model" => {
                    if let Some(s) = read_value(&mut reader, vtype)?.as_str() {
                        meta.tokenizer_model = Some(s.to_string());
                    }
                }
                "tokenizer.chat_template" => {
                    if let Some(s) = read_value(&mut reader, vtype)?.as_str() {
                        meta.chat_template = Some(s.to_string());
                    }
                }
                _ => skip_value(&mut reader, vtype)?,
            }
            continue;
        };

        let suffix = key.strip_prefix(arch).and_then(|s| s.strip_prefix('.'));
        match (key.as_str(), suffix) {
            ("general.name", _) => {
                if let Some(s) = read_value(&mut reader, vtype)?.as_str() {
                    meta.name = Some(s.to_string());
                }
            }
            ("general.file_type", _) => {
                meta.file_type = read_value(&mut reader, vtype)?.as_u32();
            }
            ("tokenizer.ggml.model", _) => {
                if let Some(s) = read_value(&mut reader, vtype)?.as_str() {
                    meta.tokenizer_model = Some(s.to_string());
                }
            }
            ("tokenizer.chat_template", _) => {
                if let Some(s) = read_value(&mut reader, vtype)?.as_str() {
                    meta.chat_template = Some(s.to_string());
                }
            }
            (_, Some("block_count")) => {
                meta.block_count = read_value(&mut reader, vtype)?.as_u32();
            }
            (_, Some("context_length")) => {
                meta.context_length = read_value(&mut reader, vtype)?.as_u32();
            }
            (_, Some("attention.head_count_kv")) => {
                meta.attention_head_count_kv = read_value(&mut reader, vtype)?.as_u32();
            }
            (_, Some("attention.key_length")) => {
                meta.attention_key_length = read_value(&mut reader, vtype)?.as_u32();
            }
            (_, Some("attention.value_length")) => {
                meta.attention_value_length = read_value(&mut reader, vtype)?.as_u32();
            }
            (_, Some("attention.sliding_window")) | (_, Some("attention.sliding_window_size")) => {
                meta.sliding_window_size = read_value(&mut reader, vtype)?.as_u32();
            }
            (_, Some("pooling_type")) => {
                let value = read_value(&mut reader, vtype)?;
                meta.pooling_type = value
                    .as_str()
                    .map(String::from)
                    .or_else(|| value.as_u32().map(|n| pooling_type_name(n).to_string()));
            }
            (_, Some("embedding_length")) => {
                meta.embedding_length = read_value(&mut reader, vtype)?.as_u32();
            }
            _ => skip_value(&mut reader, vtype)?,
        }
    }

    Ok(meta)
}

fn pooling_type_name(tag: u32) -> &'static str {
    match tag {
        1 => "mean",
        2 => "cls",
        3 => "last",
        4 => "rank",
        _ => "none",
    }
}

//  All-keys diagnostic read

/// Decode every KV pair into a tagged map. Used for diagnostics and
/// projector-to-main-model matching, where arbitrary keys (e.g.
/// `clip.vision.projection_dim`) may need inspecting.
pub fn read_all_keys(path: &Path) -> Result<HashMap<String, GGUFValue>, GGUFError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader)?;

    let mut map = HashMap::with_capacity(header.metadata_kv_count as usize);
    for _ in 0..header.metadata_kv_count {
        let kv = read_kv(&mut reader)?;
        map.insert(kv.key, kv.value);
    }
    Ok(map)
}

fn read_header(r: &mut impl Read) -> Result<GGUFHeader, GGUFError> {
    let magic = read_u32(r)?;
    if magic != GGUF_MAGIC {
        return Err(GGUFError::BadMagic(magic));
    }
    let version = read_u32(r)?;
    if version == 0 || version > GGUF_VERSION_MAX {
        return Err(GGUFError::UnsupportedVersion(version));
    }
    let tensor_count = read_u64(r)?;
    let metadata_kv_count = read_u64(r)?;
    Ok(GGUFHeader {
        version,
        tensor_count,
        metadata_kv_count,
    })
}

//  Quick scan (fast path for directory listings / CLI)

/// Read just enough of `path` to extract model metadata, bounded by
/// [`QUICK_SCAN_LIMIT`] so a file with a pathological KV count can't stall
/// a directory scan.
pub fn quick_scan(path: &Path) -> Result<QuickScanResult, GGUFError> {
    let file = fs::File::open(path)?;
    let file_size = file.metadata()?.len();
    let limit = file_size.min(QUICK_SCAN_LIMIT);

    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader)?;

    let mut metadata = GgufMetadata::default();
    let mut arch_prefix: Option<String> = None;

    for _ in 0..header.metadata_kv_count {
        let pos = reader.stream_position()?;
        if pos >= limit {
            break;
        }
        let kv = match read_kv(&mut reader) {
            Ok(kv) => kv,
            Err(GGUFError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        apply_kv_to_metadata(&kv, &mut metadata, &mut arch_prefix);
    }

    debug!(path = %path.display(), architecture = ?metadata.architecture, "quick scan complete");

    Ok(QuickScanResult {
        file_path: path.to_path_buf(),
        file_size,
        header,
        metadata,
    })
}

fn apply_kv_to_metadata(
    kv: &GGUFMetadataKV,
    meta: &mut GgufMetadata,
    arch_prefix: &mut Option<String>,
) {
    match kv.key.as_str() {
        "general.architecture" => {
            if let Some(s) = kv.value.as_str() {
                *arch_prefix = Some(s.to_string());
                meta.architecture = Some(s.to_string());
            }
            return;
        }
        "general.name" => {
            meta.name = kv.value.as_str().map(String::from);
            return;
        }
        "general.file_type" => {
            meta.file_type = kv.value.as_u32();
            return;
        }
        "tokenizer.ggml.model" => {
            meta.tokenizer_model = kv.value.as_str().map(String::from);
            return;
        }
        "tokenizer.chat_template" => {
            meta.chat_template = kv.value.as_str().map(String::from);
            return;
        }
        _ => {}
    }
    let Some(arch) = arch_prefix.as_deref() else {
        return;
    };
    let Some(suffix) = kv.key.strip_prefix(arch).and_then(|s| s.strip_prefix('.')) else {
        return;
    };
    match suffix {
        "block_count" => meta.block_count = kv.value.as_u32(),
        "context_length" => meta.context_length = kv.value.as_u32(),
        "attention.head_count_kv" => meta.attention_head_count_kv = kv.value.as_u32(),
        "attention.key_length" => meta.attention_key_length = kv.value.as_u32(),
        "attention.value_length" => meta.attention_value_length = kv.value.as_u32(),
        "attention.sliding_window" | "attention.sliding_window_size" => {
            meta.sliding_window_size = kv.value.as_u32()
        }
        "pooling_type" => {
            meta.pooling_type = kv
                .value
                .as_str()
                .map(String::from)
                .or_else(|| kv.value.as_u32().map(|n| pooling_type_name(n).to_string()))
        }
        "embedding_length" => meta.embedding_length = kv.value.as_u32(),
        _ => {}
    }
}

//  Directory scan

/// Recursively discover GGUF models in `dir`.
pub fn scan_directory(dir: &Path) -> Result<Vec<ModelEntry>, GGUFError> {
    let mut gguf_files: Vec<PathBuf> = Vec::new();
    walk_dir(dir, &mut gguf_files)?;
    gguf_files.sort();

    let mut entries: Vec<ModelEntry> = Vec::new();
    let mut seen_bases: HashMap<String, usize> = HashMap::new();

    for path in &gguf_files {
        let fname = path.file_name().unwrap_or_default().to_string_lossy();

        if fname.contains("-mmproj-") || fname.contains("_mmproj_") {
            continue;
        }

        if let Some(base) = detect_split_base(&fname) {
            if let Some(&idx) = seen_bases.get(&base) {
                entries[idx].split_parts.push(path.clone());
                entries[idx].is_split = true;
                continue;
            }
            seen_bases.insert(base.clone(), entries.len());
        }

        let scan = quick_scan(path).ok();
        let name = scan
            .as_ref()
            .and_then(|s| s.metadata.name.clone())
            .unwrap_or_else(|| fname.trim_end_matches(".gguf").to_string());

        let id = generate_model_id(path);

        entries.push(ModelEntry {
            id,
            name,
            path: path.clone(),
            file_size: scan.as_ref().map_or(0, |s| s.file_size),
            architecture: scan.as_ref().and_then(|s| s.metadata.architecture.clone()),
            quantization: scan
                .as_ref()
                .and_then(|s| s.metadata.file_type_name())
                .map(String::from),
            context_length: scan.as_ref().and_then(|s| s.metadata.context_length),
            is_split: false,
            split_parts: vec![path.clone()],
            mmproj_path: None,
        });
    }

    for path in &gguf_files {
        let fname = path.file_name().unwrap_or_default().to_string_lossy();
        if !fname.contains("-mmproj-") && !fname.contains("_mmproj_") {
            continue;
        }
        let parent = path.parent();
        for entry in &mut entries {
            if entry.path.parent() == parent && entry.mmproj_path.is_none() {
                entry.mmproj_path = Some(path.clone());
                break;
            }
        }
    }

    Ok(entries)
}

//  Internal helpers

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), GGUFError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("gguf") {
            out.push(path);
        }
    }
    Ok(())
}

fn detect_split_base(filename: &str) -> Option<String> {
    let name = filename.strip_suffix(".gguf")?;
    let parts: Vec<&str> = name.rsplitn(4, '-').collect();
    if parts.len() >= 4
        && parts[0].chars().all(|c| c.is_ascii_digit())
        && parts[1] == "of"
        && parts[2].chars().all(|c| c.is_ascii_digit())
    {
        Some(
            parts[3..]
                .iter()
                .rev()
                .copied()
                .collect::<Vec<_>>()
                .join("-"),
        )
    } else {
        None
    }
}

fn generate_model_id(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase()
        .replace(' ', "-")
}

//  Binary reading primitives

fn read_u32(r: &mut impl Read) -> Result<u32, GGUFError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("u32"))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, GGUFError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("u64"))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i8(r: &mut impl Read) -> Result<i8, GGUFError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("i8"))?;
    Ok(buf[0] as i8)
}

fn read_u8(r: &mut impl Read) -> Result<u8, GGUFError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("u8"))?;
    Ok(buf[0])
}

fn read_i16(r: &mut impl Read) -> Result<i16, GGUFError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("i16"))?;
    Ok(i16::from_le_bytes(buf))
}

fn read_u16(r: &mut impl Read) -> Result<u16, GGUFError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("u16"))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read) -> Result<i32, GGUFError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("i32"))?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> Result<i64, GGUFError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("i64"))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f32(r: &mut impl Read) -> Result<f32, GGUFError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("f32"))?;
    Ok(f32::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> Result<f64, GGUFError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("f64"))?;
    Ok(f64::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read) -> Result<String, GGUFError> {
    let len = read_u64(r)? as usize;
    if len > 16_000_000 {
        return Err(GGUFError::Other(format!("string length {len} too large")));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .map_err(|_| GGUFError::Truncated("string"))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_bool(r: &mut impl Read) -> Result<bool, GGUFError> {
    Ok(read_u8(r)? != 0)
}

fn read_value(r: &mut impl Read, vtype: GGUFValueType) -> Result<GGUFValue, GGUFError> {
    match vtype {
        GGUFValueType::Uint8 => Ok(GGUFValue::Uint8(read_u8(r)?)),
        GGUFValueType::Int8 => Ok(GGUFValue::Int8(read_i8(r)?)),
        GGUFValueType::Uint16 => Ok(GGUFValue::Uint16(read_u16(r)?)),
        GGUFValueType::Int16 => Ok(GGUFValue::Int16(read_i16(r)?)),
        GGUFValueType::Uint32 => Ok(GGUFValue::Uint32(read_u32(r)?)),
        GGUFValueType::Int32 => Ok(GGUFValue::Int32(read_i32(r)?)),
        GGUFValueType::Float32 => Ok(GGUFValue::Float32(read_f32(r)?)),
        GGUFValueType::Bool => Ok(GGUFValue::Bool(read_bool(r)?)),
        GGUFValueType::String => Ok(GGUFValue::String(read_string(r)?)),
        GGUFValueType::Array => {
            let elem_type = GGUFValueType::try_from(read_u32(r)?)?;
            let count = read_u64(r)? as usize;
            if count > 10_000_000 {
                return Err(GGUFError::Other(format!("array length {count} too large")));
            }
            let mut arr = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                arr.push(read_value(r, elem_type)?);
            }
            Ok(GGUFValue::Array(arr))
        }
        GGUFValueType::Uint64 => Ok(GGUFValue::Uint64(read_u64(r)?)),
        GGUFValueType::Int64 => Ok(GGUFValue::Int64(read_i64(r)?)),
        GGUFValueType::Float64 => Ok(GGUFValue::Float64(read_f64(r)?)),
    }
}

/// Skip a value's bytes without decoding it. For arrays this still has to
/// walk element-by-element (the element width may itself be variable, e.g.
/// an array of strings), but it never allocates the decoded value.
fn skip_value(r: &mut (impl Read + Seek), vtype: GGUFValueType) -> Result<(), GGUFError> {
    if let Some(width) = vtype.fixed_width() {
        r.seek(io::SeekFrom::Current(width as i64))
            .map_err(|_| GGUFError::Truncated("skip"))?;
        return Ok(());
    }
    match vtype {
        GGUFValueType::String => {
            let _ = read_string(r)?;
        }
        GGUFValueType::Array => {
            let elem_type = GGUFValueType::try_from(read_u32(r)?)?;
            let count = read_u64(r)? as usize;
            if count > 10_000_000 {
                return Err(GGUFError::Other(format!("array length {count} too large")));
            }
            for _ in 0..count {
                skip_value(r, elem_type)?;
            }
        }
        _ => unreachable!("fixed_width() covers every other variant"),
    }
    Ok(())
}

fn read_kv(r: &mut impl Read) -> Result<GGUFMetadataKV, GGUFError> {
    let key = read_string(r)?;
    let vtype_raw = read_u32(r)?;
    let vtype = GGUFValueType::try_from(vtype_raw)?;
    let value = read_value(r, vtype)?;
    Ok(GGUFMetadataKV {
        key,
        value_type: vtype,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// Build a minimal but realistic GGUF file: architecture + block_count +
    /// context_length + an unrelated key the reader must skip.
    fn sample_gguf() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes()); // version
        buf.extend_from_slice(&0u64.to_le_bytes()); // tensor_count
        buf.extend_from_slice(&5u64.to_le_bytes()); // metadata_kv_count

        write_string(&mut buf, "general.architecture");
        buf.extend_from_slice(&(GGUFValueType::String as u32).to_le_bytes());
        write_string(&mut buf, "llama");

        write_string(&mut buf, "llama.block_count");
        buf.extend_from_slice(&(GGUFValueType::Uint32 as u32).to_le_bytes());
        buf.extend_from_slice(&32u32.to_le_bytes());

        write_string(&mut buf, "llama.context_length");
        buf.extend_from_slice(&(GGUFValueType::Uint32 as u32).to_le_bytes());
        buf.extend_from_slice(&32768u32.to_le_bytes());

        write_string(&mut buf, "llama.rope.freq_base");
        buf.extend_from_slice(&(GGUFValueType::Array as u32).to_le_bytes());
        buf.extend_from_slice(&(GGUFValueType::Uint32 as u32).to_le_bytes());
        buf.extend_from_slice(&3u64.to_le_bytes());
        for v in [1u32, 2, 3] {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        write_string(&mut buf, "general.name");
        buf.extend_from_slice(&(GGUFValueType::String as u32).to_le_bytes());
        write_string(&mut buf, "Test Model");

        buf
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn reads_whitelisted_keys_and_skips_rest() {
        let f = write_temp(&sample_gguf());
        let meta = read_metadata(f.path()).unwrap();
        assert_eq!(meta.architecture.as_deref(), Some("llama"));
        assert_eq!(meta.block_count, Some(32));
        assert_eq!(meta.context_length, Some(32768));
        assert_eq!(meta.name.as_deref(), Some("Test Model"));
    }

    #[test]
    fn bad_magic_is_typed_error() {
        let bytes = [0u8; 16];
        let f = write_temp(&bytes);
        let err = read_metadata(f.path()).unwrap_err();
        assert!(matches!(err, GGUFError::BadMagic(_)));
    }

    #[test]
    fn truncated_files_never_panic() {
        let full = sample_gguf();
        for len in 0..=full.len() {
            let f = write_temp(&full[..len]);
            let _ = read_metadata(f.path());
            let _ = read_all_keys(f.path());
        }
    }

    #[test]
    fn round_trip_matches_full_scan() {
        let f = write_temp(&sample_gguf());
        let meta = read_metadata(f.path()).unwrap();
        let all = read_all_keys(f.path()).unwrap();

        assert_eq!(
            meta.architecture.as_deref(),
            all.get("general.architecture").and_then(|v| v.as_str())
        );
        assert_eq!(
            meta.block_count,
            all.get("llama.block_count").and_then(|v| v.as_u32())
        );
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn detects_split_files_and_groups_parts() {
        let dir = tempfile::tempdir().unwrap();
        for part in 1..=3 {
            let name = format!("M-{part:05}-of-00003.gguf");
            std::fs::write(dir.path().join(name), sample_gguf()).unwrap();
        }
        let entries = scan_directory(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_split);
        assert_eq!(entries[0].split_parts.len(), 3);
    }
}
