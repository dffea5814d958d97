//! Per-clip transcript resolution.
//!
//! Four modes, selected once per run. Filename and mapping modes are
//! total; sidecar and fixed modes fail with typed reasons because a silent
//! partial batch is worse than an explicit stop.

use std::path::Path;

use crate::error::{LipError, LipResult};
use crate::keys::candidate_keys;
use crate::model::MappingTable;

/// Diagnostic attached to a job when mapping lookup fell back to the
/// filename.
pub const MAPPING_FALLBACK_NOTE: &str =
    "WARN: no mapping entry found, using filename-derived text";

/// Transcript text plus an optional non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    pub note: String,
}

impl ResolvedText {
    fn plain(text: String) -> Self {
        Self {
            text,
            note: String::new(),
        }
    }
}

/// Mode-polymorphic transcript resolver. Borrowed inputs keep the mapping
/// table shared read-only across the whole job build.
#[derive(Debug)]
pub enum TextResolver<'a> {
    Filename,
    SidecarTxt,
    Fixed(&'a str),
    Mapping(&'a MappingTable),
}

impl<'a> TextResolver<'a> {
    /// Fixed mode. The text is validated once for the whole run.
    pub fn fixed(text: &'a str) -> LipResult<Self> {
        if text.trim().is_empty() {
            return Err(LipError::EmptyFixedText);
        }
        Ok(Self::Fixed(text))
    }

    /// Mapping mode over an already-merged table.
    pub fn mapping(table: &'a MappingTable) -> LipResult<Self> {
        if table.is_empty() {
            return Err(LipError::InvalidRequest(
                "mapping table is empty".to_owned(),
            ));
        }
        Ok(Self::Mapping(table))
    }

    /// Resolve the transcript for one clip.
    pub fn resolve(&self, audio_path: &Path) -> LipResult<ResolvedText> {
        match self {
            Self::Filename => Ok(ResolvedText::plain(filename_text(audio_path))),
            Self::SidecarTxt => sidecar_text(audio_path).map(ResolvedText::plain),
            Self::Fixed(text) => Ok(ResolvedText::plain(text.trim().to_owned())),
            Self::Mapping(table) => Ok(mapping_text(table, audio_path)),
        }
    }
}

/// Stem with `_` and `-` replaced by spaces, trimmed. Total and idempotent.
#[must_use]
pub fn filename_text(audio_path: &Path) -> String {
    audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " ").trim().to_owned())
        .unwrap_or_default()
}

/// Content of the same-stem `.txt` file beside the clip.
pub fn sidecar_text(audio_path: &Path) -> LipResult<String> {
    let txt_path = audio_path.with_extension("txt");
    if !txt_path.exists() {
        return Err(LipError::MissingSidecar(txt_path));
    }
    let bytes = std::fs::read(&txt_path)?;
    let content = String::from_utf8_lossy(&bytes).trim().to_owned();
    if content.is_empty() {
        return Err(LipError::EmptySidecar(txt_path));
    }
    Ok(content)
}

/// First candidate key with a non-blank table entry wins; a miss falls back
/// to filename text with a diagnostic note. Never fails: batch runs must
/// not abort on a handful of unmapped clips.
fn mapping_text(table: &MappingTable, audio_path: &Path) -> ResolvedText {
    for key in candidate_keys(audio_path) {
        if let Some(text) = table.lookup(&key) {
            let text = text.trim();
            if !text.is_empty() {
                return ResolvedText::plain(text.to_owned());
            }
        }
    }
    tracing::debug!(clip = %audio_path.display(), "mapping miss, filename fallback");
    ResolvedText {
        text: filename_text(audio_path),
        note: MAPPING_FALLBACK_NOTE.to_owned(),
    }
}
