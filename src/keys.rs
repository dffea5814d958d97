//! Lookup-key vocabulary shared by mapping ingestion and job resolution.
//!
//! Spreadsheet exports key their rows inconsistently: bare FormIDs, file
//! stems, voice-type-qualified paths with either separator. Both sides of a
//! lookup (parsing a mapping file, matching a clip against it) funnel
//! through [`normalize_key`] so they agree on one canonical shape.

use std::path::Path;

/// Canonicalize a raw key.
///
/// Trims whitespace, strips a leading `0x`/`0X`, then: if the remainder
/// starts with 8 hex digits those digits are returned uppercased (the
/// FormID canonical form), otherwise the trimmed string is lowercased.
/// Empty input normalizes to the empty string.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    let key = raw.trim();
    if key.is_empty() {
        return String::new();
    }
    let key = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key)
        .trim();
    if let Some(formid) = hex_prefix(key) {
        return formid.to_ascii_uppercase();
    }
    key.to_ascii_lowercase()
}

/// Ordered candidate keys for one clip, most specific first, de-duplicated.
///
/// 1. lowercased stem (exact match against stem-keyed exports)
/// 2. `dir/stem` and `dir\stem` when the containing directory has a name
///    (exports qualify by voice type with either separator)
/// 3. FormID: 8-hex prefix of the stem, else the first 8-hex run anywhere
///    in it, uppercased
///
/// Callers must try candidates in this order and stop at the first hit.
#[must_use]
pub fn candidate_keys(audio_path: &Path) -> Vec<String> {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem_lower = stem.to_ascii_lowercase();

    let mut keys = Vec::with_capacity(4);
    keys.push(stem_lower.clone());

    let parent = audio_path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !parent.is_empty() {
        keys.push(format!("{parent}/{stem_lower}"));
        keys.push(format!("{parent}\\{stem_lower}"));
    }

    if let Some(formid) = hex_prefix(&stem) {
        keys.push(formid.to_ascii_uppercase());
    } else if let Some(formid) = first_hex_run(&stem) {
        keys.push(formid.to_ascii_uppercase());
    }

    dedup_preserving_order(keys)
}

/// The first 8 characters when they are all hex digits.
fn hex_prefix(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() >= 8 && bytes[..8].iter().all(u8::is_ascii_hexdigit) {
        return Some(&s[..8]);
    }
    None
}

/// The earliest run of 8 consecutive hex digits anywhere in `s`.
fn first_hex_run(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() < 8 {
        return None;
    }
    for start in 0..=bytes.len() - 8 {
        if bytes[start..start + 8].iter().all(u8::is_ascii_hexdigit) {
            return Some(&s[start..start + 8]);
        }
    }
    None
}

fn dedup_preserving_order(keys: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keys.into_iter()
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}
