use std::path::PathBuf;

use thiserror::Error;

pub type LipResult<T> = Result<T, LipError>;

#[derive(Debug, Error)]
pub enum LipError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("generator executable not found at `{0}`")]
    MissingExecutable(PathBuf),

    #[error("required data file not found at `{0}` (must sit beside the generator executable)")]
    MissingDataFile(PathBuf),

    #[error("input folder does not exist: `{0}`")]
    MissingInputFolder(PathBuf),

    #[error("mapping file not found: `{0}`")]
    MissingMappingFile(PathBuf),

    #[error("mapping file is empty: `{0}`")]
    EmptyMapping(PathBuf),

    #[error(
        "mapping file `{0}` contains no usable rows; expected either two columns \
         (key, text) or a delimited header with key/filename and text/subtitle columns"
    )]
    NoUsableRows(PathBuf),

    #[error("missing sidecar text file: `{0}`")]
    MissingSidecar(PathBuf),

    #[error("sidecar text file is empty: `{0}`")]
    EmptySidecar(PathBuf),

    #[error("fixed text is empty")]
    EmptyFixedText,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a run is already active")]
    RunActive,
}

impl LipError {
    /// Stable, machine-readable code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "LIP-IO",
            Self::Json(_) => "LIP-JSON",
            Self::MissingExecutable(_) => "LIP-EXE-MISSING",
            Self::MissingDataFile(_) => "LIP-CDF-MISSING",
            Self::MissingInputFolder(_) => "LIP-INPUT-MISSING",
            Self::MissingMappingFile(_) => "LIP-MAPPING-MISSING",
            Self::EmptyMapping(_) => "LIP-MAPPING-EMPTY",
            Self::NoUsableRows(_) => "LIP-MAPPING-UNUSABLE",
            Self::MissingSidecar(_) => "LIP-SIDECAR-MISSING",
            Self::EmptySidecar(_) => "LIP-SIDECAR-EMPTY",
            Self::EmptyFixedText => "LIP-FIXED-EMPTY",
            Self::InvalidRequest(_) => "LIP-INVALID-REQUEST",
            Self::RunActive => "LIP-RUN-ACTIVE",
        }
    }

    /// `true` for errors that invalidate the run before any job starts.
    #[must_use]
    pub const fn is_input_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingExecutable(_)
                | Self::MissingDataFile(_)
                | Self::MissingInputFolder(_)
                | Self::MissingMappingFile(_)
                | Self::EmptyMapping(_)
                | Self::NoUsableRows(_)
                | Self::EmptyFixedText
                | Self::InvalidRequest(_)
        )
    }
}
