use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// File name of the synthesis executable, expected inside the generator
/// directory.
pub const GENERATOR_EXE: &str = "LipGenerator.exe";

/// Fixed-name data file the generator needs beside the executable.
pub const GENERATOR_DATA_FILE: &str = "FonixData.cdf";

/// Extension of input audio clips (matched case-insensitively).
pub const AUDIO_EXTENSION: &str = "wav";

/// Extension of the produced animation artifacts.
pub const ARTIFACT_EXTENSION: &str = "lip";

/// Languages the synthesis tool accepts via its `-Language:` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SynthLanguage {
    UsEnglish,
    French,
    German,
    Spanish,
    Italian,
    Korean,
    Japanese,
}

impl SynthLanguage {
    /// Spelling the external tool expects on the command line.
    #[must_use]
    pub const fn flag_value(self) -> &'static str {
        match self {
            Self::UsEnglish => "USEnglish",
            Self::French => "French",
            Self::German => "German",
            Self::Spanish => "Spanish",
            Self::Italian => "Italian",
            Self::Korean => "Korean",
            Self::Japanese => "Japanese",
        }
    }
}

impl Default for SynthLanguage {
    fn default() -> Self {
        Self::UsEnglish
    }
}

/// Where the transcript text for each clip comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Stem with `_`/`-` replaced by spaces. Never fails.
    Filename,
    /// Same-stem `.txt` file beside the clip. Missing or empty sidecars
    /// abort the whole build.
    SidecarTxt,
    /// One fixed string for every clip.
    Fixed,
    /// Heuristic key lookup in a merged mapping table, with filename
    /// fallback on miss.
    Mapping,
}

/// One discovered input clip. Immutable after the directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRecord {
    pub path: PathBuf,
}

impl AudioRecord {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// File stem, lossily decoded. Empty string for pathological names.
    #[must_use]
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One unit of work: a clip, its destination artifact, and the resolved
/// transcript. `note` carries non-fatal diagnostics (mapping fallback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub source: AudioRecord,
    pub destination: PathBuf,
    pub text: String,
    pub note: String,
}

/// Normalized key → transcript text.
///
/// Keys are either an uppercase 8-hex-digit FormID or an arbitrary
/// lowercase token. No key ever maps to an empty string; `insert` enforces
/// this rather than trusting callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    entries: HashMap<String, String>,
}

impl MappingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key → text pair. Empty keys and blank texts are ignored.
    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        let key = key.into();
        let text = text.into();
        if key.is_empty() || text.trim().is_empty() {
            return;
        }
        self.entries.insert(key, text);
    }

    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Terminal result of supervising one generator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub job: Job,
    pub succeeded: bool,
    pub canceled: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Lifecycle of a run, owned exclusively by the run controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    StopRequested,
    Done,
}

/// The only data crossing from the worker to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Log(String),
    Progress(usize),
    Done(String),
}

/// Immutable parameters for one run. Built by the caller, moved into the
/// worker, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub recursive: bool,
    pub preserve_structure: bool,
    pub language: SynthLanguage,
    /// Forwarded verbatim as `-GestureExaggeration:<value>` when non-blank.
    pub gesture: Option<String>,
    pub text_source: TextSource,
    pub fixed_text: Option<String>,
    pub mapping_files: Vec<PathBuf>,
    /// Directory holding the generator executable and its data file.
    pub generator_dir: PathBuf,
}

impl RunConfig {
    #[must_use]
    pub fn exe_path(&self) -> PathBuf {
        self.generator_dir.join(GENERATOR_EXE)
    }

    #[must_use]
    pub fn data_file_path(&self) -> PathBuf {
        self.generator_dir.join(GENERATOR_DATA_FILE)
    }

    /// Gesture value after trimming, `None` when blank.
    #[must_use]
    pub fn gesture_value(&self) -> Option<&str> {
        self.gesture
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

/// Final accounting for a run, emitted regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// `true` when the run stopped early on request.
    pub canceled: bool,
    pub started_at_rfc3339: String,
    pub finished_at_rfc3339: String,
}

/// Destination artifact path for a clip.
///
/// With `preserve_structure` the clip's path relative to the input root is
/// mirrored under the output root; otherwise everything flattens into the
/// output root. The extension becomes `.lip` either way.
#[must_use]
pub fn artifact_path(
    source: &Path,
    input_dir: &Path,
    output_dir: &Path,
    preserve_structure: bool,
) -> PathBuf {
    if preserve_structure
        && let Ok(rel) = source.strip_prefix(input_dir)
    {
        return output_dir.join(rel).with_extension(ARTIFACT_EXTENSION);
    }
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{stem}.{ARTIFACT_EXTENSION}"))
}
