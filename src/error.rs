//! Error types for vector-list filtering.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FilterError>;

/// Errors that can occur while building the key index or filtering manifests.
#[derive(Debug, Error)]
pub enum FilterError {
    /// An input file does not exist
    #[error("Input file not found: '{}'", path.display())]
    MissingFile { path: PathBuf },

    /// A manifest line without a label, rejected under the strict policy
    #[error("Malformed line {line_number} in '{}': expected 'key label', got {line:?}", path.display())]
    MalformedLine {
        path: PathBuf,
        line_number: usize,
        line: String,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two jobs in one run write to the same output
    #[error("Output path '{}' is used by more than one manifest", path.display())]
    DuplicateOutput { path: PathBuf },

    #[error("Output path '{}' is the same as its input manifest", path.display())]
    OutputIsInput { path: PathBuf },

    /// Plan file could not be read or parsed
    #[error("Invalid plan file '{}': {message}", path.display())]
    Plan { path: PathBuf, message: String },

    #[error("Got {manifests} manifest(s) but {outputs} output(s); they must pair up")]
    JobMismatch { manifests: usize, outputs: usize },
}

impl FilterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FilterError::Io {
            path: path.into(),
            source,
        }
    }
}
