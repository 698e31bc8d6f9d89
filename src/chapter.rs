//! Chapter label parsing and ordering
//!
//! Labels are published chapter numbers kept as strings (`"102"`, `"102.5"`).
//! Everything that compares or orders labels goes through this module so the
//! numeric/string fallback lives in one place.
//!
//! Total order used by [`compare_labels`]:
//! 1. Labels that parse as finite numbers ascend by value; equal values are
//!    ordered by their string form (`"7"` before `"7.0"`).
//! 2. Labels that do not parse sort after every numeric label, and
//!    lexicographically among themselves.

use crate::types::ChapterRef;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)").unwrap_or_else(|e| panic!("invalid label pattern: {e}"))
});

/// Numeric value of a label, if it has one
pub fn parse_label(label: &str) -> Option<f64> {
    label
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// First chapter number found in free text ("Capítulo 102.5 - Title" -> "102.5")
pub fn extract_label(text: &str) -> Option<String> {
    LABEL_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether `candidate` is newer than `watermark`
///
/// Without a watermark every chapter is new. When both labels are numeric the
/// comparison is numeric; otherwise any label different from the watermark is new.
pub fn is_new(candidate: &str, watermark: Option<&str>) -> bool {
    let Some(watermark) = watermark else {
        return true;
    };

    match (parse_label(candidate), parse_label(watermark)) {
        (Some(c), Some(w)) => c > w,
        _ => candidate != watermark,
    }
}

/// Whether two labels name the same chapter ("10" and "10.0" do)
pub fn same_label(a: &str, b: &str) -> bool {
    match (parse_label(a), parse_label(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.trim() == b.trim(),
    }
}

/// The single label comparator; see the module docs for the order
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    match (parse_label(a), parse_label(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Sort chapters oldest first
pub fn sort_ascending(chapters: &mut [ChapterRef]) {
    chapters.sort_by(|a, b| compare_labels(&a.label, &b.label));
}

#[derive(Hash, PartialEq, Eq)]
enum LabelKey {
    Number(u64),
    Text(String),
}

fn label_key(label: &str) -> LabelKey {
    match parse_label(label) {
        // +0.0 so "0" and "-0" share a key
        Some(value) => LabelKey::Number((value + 0.0).to_bits()),
        None => LabelKey::Text(label.trim().to_string()),
    }
}

/// Drop repeated chapters, keeping the first occurrence
///
/// Labels are compared like [`same_label`]: "12" and "12.00" are one chapter.
pub fn dedup_by_label(chapters: Vec<ChapterRef>) -> Vec<ChapterRef> {
    let mut seen = HashSet::new();
    chapters
        .into_iter()
        .filter(|chapter| seen.insert(label_key(&chapter.label)))
        .collect()
}

/// Newest chapter label in a listing
///
/// The highest numeric label wins. When nothing parses, the first listed
/// chapter is taken as newest since sources list newest first.
pub fn newest_label(chapters: &[ChapterRef]) -> Option<&str> {
    chapters
        .iter()
        .filter(|c| parse_label(&c.label).is_some())
        .max_by(|a, b| compare_labels(&a.label, &b.label))
        .or_else(|| chapters.first())
        .map(|c| c.label.as_str())
}
