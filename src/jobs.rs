//! Clip discovery and job-list construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{LipError, LipResult};
use crate::model::{
    artifact_path, AudioRecord, Job, MappingTable, RunConfig, TextSource, AUDIO_EXTENSION,
};
use crate::resolve::TextResolver;

/// Enumerate audio clips under `folder`.
///
/// Extension match is case-insensitive. Paths reaching the same file (e.g.
/// via symlink) are de-duplicated on their canonical form, and the result
/// is sorted case-insensitively for deterministic job ordering.
pub fn find_audio_files(folder: &Path, recursive: bool) -> LipResult<Vec<AudioRecord>> {
    if !folder.is_dir() {
        return Err(LipError::MissingInputFolder(folder.to_path_buf()));
    }

    let walker = if recursive {
        WalkDir::new(folder)
    } else {
        WalkDir::new(folder).max_depth(1)
    };

    let mut unique: HashMap<PathBuf, PathBuf> = HashMap::new();
    for entry in walker.into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_audio = path
            .extension()
            .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(AUDIO_EXTENSION));
        if !is_audio {
            continue;
        }
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        unique.entry(canonical).or_insert_with(|| path.to_path_buf());
    }

    let mut files: Vec<PathBuf> = unique.into_values().collect();
    files.sort_by_key(|p| p.to_string_lossy().to_ascii_lowercase());
    tracing::debug!(folder = %folder.display(), count = files.len(), "scanned audio clips");
    Ok(files.into_iter().map(AudioRecord::new).collect())
}

/// Compose the full job list for a run.
///
/// `mapping` must be the merged table when the run uses mapping mode, and
/// is ignored otherwise. Errors global to the run (empty fixed text,
/// unusable mapping) and per-file sidecar failures both abort the build;
/// mapping misses do not; they fall back to filename text with a note.
pub fn build_jobs(config: &RunConfig, mapping: Option<&MappingTable>) -> LipResult<Vec<Job>> {
    let records = find_audio_files(&config.input_dir, config.recursive)?;

    let resolver = match config.text_source {
        TextSource::Filename => TextResolver::Filename,
        TextSource::SidecarTxt => TextResolver::SidecarTxt,
        TextSource::Fixed => TextResolver::fixed(config.fixed_text.as_deref().unwrap_or(""))?,
        TextSource::Mapping => {
            let table = mapping.ok_or_else(|| {
                LipError::InvalidRequest("mapping mode requires a mapping table".to_owned())
            })?;
            TextResolver::mapping(table)?
        }
    };

    let mut jobs = Vec::with_capacity(records.len());
    for record in records {
        let destination = artifact_path(
            &record.path,
            &config.input_dir,
            &config.output_dir,
            config.preserve_structure,
        );
        let resolved = resolver.resolve(&record.path)?;
        jobs.push(Job {
            source: record,
            destination,
            text: resolved.text,
            note: resolved.note,
        });
    }
    Ok(jobs)
}
