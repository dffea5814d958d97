//! Heuristic ingestion of loosely-structured transcript spreadsheets.
//!
//! LazyVoiceFinder-style exports come tab-, semicolon-, or comma-separated,
//! with reordered, renamed, or missing header columns. The parser guesses
//! the delimiter, detects which columns hold keys, voice types, and text,
//! and produces a [`MappingTable`]. Column detection is isolated in
//! [`detect_columns`] so the heuristics stay testable without file I/O.
//!
//! This is not a full CSV sniffer: quoted commas under semicolon delimiting
//! are out of scope. Splitting is quote-aware under the chosen delimiter,
//! and surrounding quotes on individual cells are stripped.

use std::path::{Path, PathBuf};

use crate::error::{LipError, LipResult};
use crate::keys::normalize_key;
use crate::model::MappingTable;

/// Header tokens that mark the first row as a header rather than data.
const HEADER_VOCAB: &[&str] = &[
    "formid",
    "id",
    "key",
    "filename",
    "file",
    "wav",
    "path",
    "voicefile",
    "subtitle",
    "text",
    "dialogue",
    "translated",
    "translation",
    "target",
];

const KEY_EXACT_ID: &[&str] = &["formid", "id", "key"];
const KEY_EXACT_FILE: &[&str] = &["filename", "file", "wav", "path", "voicefile"];
const KEY_SUBSTRING: &[&str] = &["filename", "file", "wav", "path", "voice"];

const VOICE_EXACT: &[&str] = &["voicetype", "voice", "voicename"];
const VOICE_SUBSTRING: &[&str] = &["voicetype", "voice"];

const TEXT_EXACT_TRANSLATED: &[&str] =
    &["translated", "translation", "target", "targettext", "translatedtext"];
const TEXT_EXACT_RAW: &[&str] = &["subtitle", "subtitles", "text", "dialogue", "line"];
const TEXT_SUBSTRING: &[&str] = &[
    "translated",
    "translation",
    "target",
    "subtitle",
    "dialogue",
    "text",
];

/// Keys that are really header labels left behind by a wrong delimiter
/// guess. Rows keyed by these are dropped.
const HEADER_LABEL_KEYS: &[&str] = &[
    "formid", "id", "key", "filename", "file", "wav", "path", "voicefile",
];

/// Column indices resolved from a header row. `None` means the role could
/// not be identified and the two-column fallback applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnRoles {
    pub key: Option<usize>,
    pub voice: Option<usize>,
    pub text: Option<usize>,
}

/// Guess the cell delimiter for a whole file.
///
/// Tab wins if present anywhere. Semicolon is chosen only when the file
/// contains at least one semicolon and no comma at all. Comma otherwise.
#[must_use]
pub fn detect_delimiter(raw: &str) -> char {
    if raw.contains('\t') {
        '\t'
    } else if raw.contains(';') && !raw.contains(',') {
        ';'
    } else {
        ','
    }
}

/// Normalize one header cell: trim, lowercase, drop spaces and
/// underscores. Hyphens survive so substring checks still hit headers like
/// `Dialogue2-German`.
fn normalize_header_cell(cell: &str) -> String {
    cell.trim()
        .to_ascii_lowercase()
        .replace([' ', '_'], "")
}

/// Resolve column roles from a normalized header row.
///
/// Key: exact id-ish names, then exact file-ish names, then substring.
/// Voice: exact, then substring.
/// Text: translated/target vocabulary outranks raw subtitle text; substring
/// over the union last. When key and text land on the same column the text
/// search retries excluding it.
#[must_use]
pub fn detect_columns(header: &[String]) -> ColumnRoles {
    let exact = |names: &[&str]| {
        header
            .iter()
            .position(|cell| names.contains(&cell.as_str()))
    };
    let containing = |needles: &[&str], exclude: Option<usize>| {
        header.iter().enumerate().position(|(i, cell)| {
            Some(i) != exclude && needles.iter().any(|needle| cell.contains(needle))
        })
    };

    let key = exact(KEY_EXACT_ID)
        .or_else(|| exact(KEY_EXACT_FILE))
        .or_else(|| containing(KEY_SUBSTRING, None));

    let voice = exact(VOICE_EXACT).or_else(|| containing(VOICE_SUBSTRING, None));

    let mut text = exact(TEXT_EXACT_TRANSLATED)
        .or_else(|| exact(TEXT_EXACT_RAW))
        .or_else(|| containing(TEXT_SUBSTRING, None));

    if let (Some(k), Some(t)) = (key, text)
        && k == t
    {
        text = containing(TEXT_SUBSTRING, Some(k));
    }

    ColumnRoles { key, voice, text }
}

/// Reduce a key cell to a normalized key. Cells that look like paths or end
/// in the audio extension are reduced to their filename stem first.
fn extract_key(cell: &str) -> String {
    let raw = cell.trim();
    if raw.is_empty() {
        return String::new();
    }
    let lowered = raw.to_ascii_lowercase();
    if raw.contains('\\') || raw.contains('/') || lowered.ends_with(".wav") {
        // Windows-style separators do not split on Unix; normalize first.
        let unified = raw.replace('\\', "/");
        let stem = Path::new(&unified)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| raw.to_owned());
        return normalize_key(&stem);
    }
    normalize_key(raw)
}

/// Split one line on `delimiter`, keeping delimiters inside double-quoted
/// cells literal. Doubled quotes toggle twice and cancel out.
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            cell.push(ch);
        } else if ch == delimiter && !in_quotes {
            cells.push(std::mem::take(&mut cell));
        } else {
            cell.push(ch);
        }
    }
    cells.push(cell);
    cells
}

/// Strip one pair of surrounding double quotes and collapse doubled quotes.
fn unquote(cell: &str) -> String {
    let trimmed = cell.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].replace("\"\"", "\"");
    }
    trimmed.to_owned()
}

/// Parse one mapping file into a table.
pub fn parse_mapping_file(path: &Path) -> LipResult<MappingTable> {
    if !path.exists() {
        return Err(LipError::MissingMappingFile(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let raw = String::from_utf8_lossy(&bytes);
    parse_mapping_text(&raw, path)
}

/// Parse already-loaded mapping text. `origin` only feeds error messages.
pub fn parse_mapping_text(raw: &str, origin: &Path) -> LipResult<MappingTable> {
    let delimiter = detect_delimiter(raw);

    let rows: Vec<Vec<String>> = raw
        .lines()
        .map(|line| {
            split_row(line, delimiter)
                .iter()
                .map(|cell| unquote(cell))
                .collect::<Vec<_>>()
        })
        .filter(|cells: &Vec<String>| cells.iter().any(|c| !c.trim().is_empty()))
        .collect();

    if rows.is_empty() {
        return Err(LipError::EmptyMapping(origin.to_path_buf()));
    }

    let header: Vec<String> = rows[0].iter().map(|c| normalize_header_cell(c)).collect();
    let has_header = header
        .iter()
        .any(|cell| HEADER_VOCAB.contains(&cell.as_str()));

    let roles = if has_header {
        detect_columns(&header)
    } else {
        ColumnRoles::default()
    };

    let data_rows = if has_header { &rows[1..] } else { &rows[..] };
    tracing::debug!(
        file = %origin.display(),
        delimiter = %delimiter.escape_default(),
        has_header,
        key_col = ?roles.key,
        voice_col = ?roles.voice,
        text_col = ?roles.text,
        rows = data_rows.len(),
        "parsed mapping structure"
    );

    let mut table = MappingTable::new();
    for row in data_rows {
        let (raw_key, raw_text, raw_voice) = match (roles.key, roles.text) {
            (Some(k), Some(t)) => {
                if k >= row.len() || t >= row.len() {
                    continue;
                }
                let voice = roles
                    .voice
                    .filter(|&v| v < row.len())
                    .map(|v| row[v].as_str())
                    .unwrap_or("");
                (row[k].as_str(), row[t].as_str(), voice)
            }
            // Role detection failed: first two cells carry key and text.
            _ => {
                if row.len() < 2 {
                    continue;
                }
                (row[0].as_str(), row[1].as_str(), "")
            }
        };

        let key = extract_key(raw_key);
        if key.is_empty() {
            continue;
        }
        let text = raw_text.trim();
        if text.is_empty() {
            continue;
        }
        // A header row that survived a bad delimiter guess.
        if HEADER_LABEL_KEYS.contains(&key.as_str()) {
            continue;
        }

        table.insert(key.clone(), text);

        let voice = raw_voice.trim().to_ascii_lowercase();
        if !voice.is_empty() {
            // Composite keys let directory+stem candidates hit rows keyed
            // by voice type instead of filesystem folder name.
            table.insert(format!("{voice}/{key}"), text);
            table.insert(format!("{voice}\\{key}"), text);
        }
    }

    if table.is_empty() {
        return Err(LipError::NoUsableRows(origin.to_path_buf()));
    }
    Ok(table)
}

/// Merge per-file tables into one.
///
/// Collisions keep the longer text (treated as the more complete entry);
/// the first writer wins ties. The tie-break makes this fold deterministic
/// only with respect to input order when lengths are equal.
#[must_use]
pub fn merge_tables(tables: &[MappingTable]) -> MappingTable {
    let mut merged = MappingTable::new();
    for table in tables {
        for (key, text) in table.iter() {
            match merged.lookup(key) {
                Some(existing) if text.len() <= existing.len() => {}
                _ => merged.insert(key, text),
            }
        }
    }
    merged
}

/// Parse and merge a set of mapping files.
pub fn load_mappings(files: &[PathBuf]) -> LipResult<MappingTable> {
    if files.is_empty() {
        return Err(LipError::InvalidRequest(
            "at least one mapping file is required".to_owned(),
        ));
    }
    let tables = files
        .iter()
        .map(|f| parse_mapping_file(f))
        .collect::<LipResult<Vec<_>>>()?;
    Ok(merge_tables(&tables))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::error::LipError;

    fn parse(raw: &str) -> LipResult<MappingTable> {
        parse_mapping_text(raw, Path::new("test.csv"))
    }

    // -- delimiter detection --

    #[test]
    fn tab_wins_over_everything() {
        assert_eq!(detect_delimiter("a\tb;c,d"), '\t');
    }

    #[test]
    fn semicolon_only_without_commas() {
        assert_eq!(detect_delimiter("a;b\nc;d"), ';');
        assert_eq!(detect_delimiter("a;b,c"), ',');
    }

    #[test]
    fn comma_is_the_default() {
        assert_eq!(detect_delimiter("a,b"), ',');
        assert_eq!(detect_delimiter("plain"), ',');
    }

    // -- column detection --

    fn headers(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| normalize_header_cell(c)).collect()
    }

    #[test]
    fn exact_id_outranks_filename() {
        let roles = detect_columns(&headers(&["File Name", "FormID", "Subtitle"]));
        assert_eq!(roles.key, Some(1));
        assert_eq!(roles.text, Some(2));
    }

    #[test]
    fn filename_found_when_no_id_column() {
        let roles = detect_columns(&headers(&["File Name", "Subtitle"]));
        assert_eq!(roles.key, Some(0));
        assert_eq!(roles.text, Some(1));
    }

    #[test]
    fn translated_text_outranks_subtitle() {
        let roles = detect_columns(&headers(&["FormID", "Subtitle", "Translated"]));
        assert_eq!(roles.text, Some(2));
    }

    #[test]
    fn substring_match_hits_dialect_headers() {
        // LazyVoiceFinder localized exports: "Dialogue 2 - German"
        let roles = detect_columns(&headers(&["FormID", "Dialogue 2 - German"]));
        assert_eq!(roles.key, Some(0));
        assert_eq!(roles.text, Some(1));
    }

    #[test]
    fn voice_column_detected() {
        let roles = detect_columns(&headers(&["Voice Type", "File Name", "Subtitle"]));
        assert_eq!(roles.voice, Some(0));
        assert_eq!(roles.key, Some(1));
        assert_eq!(roles.text, Some(2));
    }

    #[test]
    fn coinciding_key_and_text_retries_excluding_key() {
        // "WavText" wins both the key substring search ("wav") and the text
        // substring search ("text"); the retry must move text off column 0.
        let roles = detect_columns(&headers(&["WavText", "German Translation"]));
        assert_eq!(roles.key, Some(0));
        assert_eq!(roles.text, Some(1));
    }

    #[test]
    fn unrecognized_header_yields_no_roles() {
        let roles = detect_columns(&headers(&["alpha", "beta"]));
        assert_eq!(roles, ColumnRoles::default());
    }

    // -- parsing --

    #[test]
    fn spec_scenario_header_csv() {
        let table = parse(
            "File Name,Subtitle\n\
             Hello_World.wav,\"Hi there\"\n\
             greet01.wav,\n\
             x.wav,Bye\n",
        )
        .expect("parse");
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("hello_world"), Some("Hi there"));
        assert_eq!(table.lookup("x"), Some("Bye"));
        assert_eq!(table.lookup("greet01"), None, "empty-text row is dropped");
    }

    #[test]
    fn headerless_two_column_tsv() {
        let table = parse("0001abcd\tHello friend\ngreet01\tWelcome\n").expect("parse");
        assert_eq!(table.lookup("0001ABCD"), Some("Hello friend"));
        assert_eq!(table.lookup("greet01"), Some("Welcome"));
    }

    #[test]
    fn path_like_keys_reduce_to_stem() {
        let table = parse(
            "File Name,Subtitle\n\
             Sound\\Voice\\Mod.esp\\MaleNord\\greet01.wav,Hello\n",
        )
        .expect("parse");
        assert_eq!(table.lookup("greet01"), Some("Hello"));
    }

    #[test]
    fn forward_slash_paths_reduce_to_stem() {
        let table = parse("File Name,Subtitle\nvoices/npc/line7.wav,Hi\n").expect("parse");
        assert_eq!(table.lookup("line7"), Some("Hi"));
    }

    #[test]
    fn voice_type_adds_composite_keys() {
        let table = parse(
            "Voice Type,File Name,Subtitle\n\
             MaleNord,greet01.wav,Hello there\n",
        )
        .expect("parse");
        assert_eq!(table.lookup("greet01"), Some("Hello there"));
        assert_eq!(table.lookup("malenord/greet01"), Some("Hello there"));
        assert_eq!(table.lookup("malenord\\greet01"), Some("Hello there"));
    }

    #[test]
    fn blank_rows_are_discarded() {
        let table = parse("File Name,Subtitle\n,\n  ,  \nx.wav,Bye\n").expect("parse");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn empty_file_fails_with_empty_mapping() {
        let err = parse("").expect_err("empty input");
        assert!(matches!(err, LipError::EmptyMapping(_)), "got {err:?}");
        let err = parse("\n  \n").expect_err("blank input");
        assert!(matches!(err, LipError::EmptyMapping(_)), "got {err:?}");
    }

    #[test]
    fn all_unusable_rows_fail_with_no_usable_rows() {
        let err = parse("File Name,Subtitle\n,orphan text\nkey.wav,\n").expect_err("unusable");
        assert!(matches!(err, LipError::NoUsableRows(_)), "got {err:?}");
    }

    #[test]
    fn leftover_header_labels_are_skipped_as_keys() {
        // Concatenated exports carry a second header row mid-file; its key
        // cell equals a header label and must not land in the table.
        let table = parse(
            "FormID,Subtitle\n\
             0001abcd,Hello\n\
             FormID,Subtitle\n\
             0001abce,Bye\n",
        )
        .expect("parse");
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("formid"), None);
        assert_eq!(table.lookup("0001ABCE"), Some("Bye"));
    }

    #[test]
    fn formid_keys_normalize_with_hex_marker() {
        let table = parse("FormID,Subtitle\n0x0001abcd,Greetings\n").expect("parse");
        assert_eq!(table.lookup("0001ABCD"), Some("Greetings"));
    }

    #[test]
    fn rows_shorter_than_resolved_columns_are_skipped() {
        let table = parse("FormID,Voice Type,Subtitle\nonlykey\n0001abcd,MaleNord,Hi\n")
            .expect("parse");
        assert_eq!(table.lookup("0001ABCD"), Some("Hi"));
        assert_eq!(table.len(), 3, "base entry plus two voice composites");
    }

    #[test]
    fn quoted_cells_are_unquoted() {
        let table = parse("File Name,Subtitle\nx.wav,\"He said \"\"hi\"\"\"\n").expect("parse");
        assert_eq!(table.lookup("x"), Some("He said \"hi\""));
    }

    #[test]
    fn quoted_cell_keeps_embedded_delimiter() {
        let table = parse("File Name,Subtitle\nHello_World.wav,\"Hi, friend\"\n").expect("parse");
        assert_eq!(table.lookup("hello_world"), Some("Hi, friend"));
    }

    #[test]
    fn quoted_key_cell_keeps_embedded_delimiter() {
        let table =
            parse("File Name,Subtitle\n\"Hello, World.wav\",Hi\n").expect("parse");
        assert_eq!(table.lookup("hello, world"), Some("Hi"));
    }

    // -- merging --

    #[test]
    fn merge_longer_text_wins_regardless_of_order() {
        let a = parse("File Name,Subtitle\nabcdef01.wav,Hi\n").expect("a");
        let b = parse("File Name,Subtitle\nabcdef01.wav,Hi there\n").expect("b");
        let ab = merge_tables(&[a.clone(), b.clone()]);
        let ba = merge_tables(&[b, a]);
        assert_eq!(ab.lookup("ABCDEF01"), Some("Hi there"));
        assert_eq!(ba.lookup("ABCDEF01"), Some("Hi there"));
    }

    #[test]
    fn merge_equal_lengths_first_writer_wins() {
        let a = parse("File Name,Subtitle\nx.wav,aaa\n").expect("a");
        let b = parse("File Name,Subtitle\nx.wav,bbb\n").expect("b");
        let merged = merge_tables(&[a, b]);
        assert_eq!(merged.lookup("x"), Some("aaa"));
    }

    #[test]
    fn merge_disjoint_keys_is_a_union() {
        let a = parse("File Name,Subtitle\na.wav,One\n").expect("a");
        let b = parse("File Name,Subtitle\nb.wav,Two\n").expect("b");
        let merged = merge_tables(&[a, b]);
        assert_eq!(merged.len(), 2);
    }

    // -- load_mappings --

    #[test]
    fn load_mappings_rejects_empty_list() {
        let err = load_mappings(&[]).expect_err("no files");
        assert!(matches!(err, LipError::InvalidRequest(_)), "got {err:?}");
    }

    #[test]
    fn load_mappings_reports_missing_file() {
        let err = load_mappings(&[PathBuf::from("/no/such/file.csv")]).expect_err("missing");
        assert!(matches!(err, LipError::MissingMappingFile(_)), "got {err:?}");
    }

    #[test]
    fn load_mappings_merges_files_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "File Name,Subtitle\nabcdef01.wav,Hi\n").expect("write a");
        std::fs::write(&b, "File Name,Subtitle\nabcdef01.wav,Hi there\n").expect("write b");
        let merged = load_mappings(&[a, b]).expect("load");
        assert_eq!(merged.lookup("ABCDEF01"), Some("Hi there"));
    }
}
