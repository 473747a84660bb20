use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error("cannot relativize {deep} against {base}: no components beyond the base")]
    PathError { base: String, deep: String },

    #[error("completion ledger not available at {0}")]
    LedgerUnavailable(PathBuf),

    #[error("fetch failed for {slot}: {message}")]
    FetchFailure { slot: String, message: String },

    #[error("malformed canonical name: {0}")]
    MalformedName(String),

    #[error("invalid retrieval unit: {0}")]
    InvalidUnit(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid project name: {0}")]
    InvalidProject(String),

    #[error("band {index} requested but raster has {bands} bands")]
    BandOutOfRange { index: usize, bands: usize },

    #[error("raster error: {0}")]
    Raster(String),

    #[error("summary table {path} has unexpected header: {found}")]
    SummaryHeader { path: PathBuf, found: String },

    #[error("summary table row is not sortable: {0}")]
    SummaryRow(String),

    #[error("missing config file srm.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("imagery request failed: {0}")]
    FetchHttp(String),

    #[error("imagery service returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{failed} preface batch(es) of project {project} did not complete")]
    BatchIncomplete { project: String, failed: usize },
}

impl RetrievalError {
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            RetrievalError::FetchFailure { .. }
                | RetrievalError::FetchHttp(_)
                | RetrievalError::FetchStatus { .. }
                | RetrievalError::BatchIncomplete { .. }
        )
    }
}
