//! Split-file ("multi-part") GGUF detection (§4.C).

use std::sync::LazyLock;

use regex::Regex;

static SPLIT_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"^(?P<base>.+)-(?P<part>\d{5})-of-(?P<total>\d{5})\.gguf$").unwrap(),
        Regex::new(r"^(?P<base>.+)\.gguf\.part(?P<part>\d+)of(?P<total>\d+)$").unwrap(),
        Regex::new(r"^(?P<base>.+)_part_(?P<part>\d+)_of_(?P<total>\d+)\.gguf$").unwrap(),
    ]
});

/// A parsed split-file suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMatch {
    pub base_name: String,
    pub part: u32,
    pub total: u32,
}

/// Match `filename` against the three recognized split-file conventions.
/// Returns `None` for an ordinary (non-split) filename.
pub fn match_split(filename: &str) -> Option<SplitMatch> {
    for re in SPLIT_PATTERNS.iter() {
        if let Some(caps) = re.captures(filename) {
            let part: u32 = caps["part"].parse().ok()?;
            let total: u32 = caps["total"].parse().ok()?;
            return Some(SplitMatch {
                base_name: caps["base"].to_string(),
                part,
                total,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_numbered_suffix() {
        let m = match_split("Model-00002-of-00003.gguf").unwrap();
        assert_eq!(m.base_name, "Model");
        assert_eq!(m.part, 2);
        assert_eq!(m.total, 3);
    }

    #[test]
    fn matches_dot_part_suffix() {
        let m = match_split("model.gguf.part2of5").unwrap();
        assert_eq!(m.base_name, "model");
        assert_eq!(m.part, 2);
        assert_eq!(m.total, 5);
    }

    #[test]
    fn matches_underscore_part_suffix() {
        let m = match_split("model_part_1_of_4.gguf").unwrap();
        assert_eq!(m.base_name, "model");
        assert_eq!(m.part, 1);
        assert_eq!(m.total, 4);
    }

    #[test]
    fn rejects_plain_filenames() {
        assert!(match_split("Qwen2-7B-Instruct-Q4_K_M.gguf").is_none());
    }
}
