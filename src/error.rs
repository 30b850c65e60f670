//! Error types for the gpsetlist library

use std::io;
use std::path::PathBuf;

/// Library error type for gpsetlist operations
#[derive(Debug, thiserror::Error)]
pub enum SetlistError {
    /// Parsing error when reading Guitar Pro files
    #[error("parsing error: {0}")]
    ParsingError(String),

    /// Error when encoding a song back to Guitar Pro bytes
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// A document does not fit the structure of the setlist being built
    #[error("structure error: {0}")]
    StructureError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Nothing to merge
    #[error("no input files provided")]
    EmptyInputError,

    /// The first document could not be loaded, there is no base to merge into
    #[error("error loading first file {}: {cause}", .path.display())]
    LoadError {
        path: PathBuf,
        cause: Box<SetlistError>,
    },

    /// A subsequent document was skipped
    #[error("error processing {}: {cause}", .path.display())]
    MergeStepError {
        path: PathBuf,
        cause: Box<SetlistError>,
    },

    /// The merged song could not be written
    #[error("error saving merged file {}: {cause}", .path.display())]
    SaveError {
        path: PathBuf,
        cause: Box<SetlistError>,
    },
}

impl From<io::Error> for SetlistError {
    fn from(error: io::Error) -> Self {
        Self::IoError(error.to_string())
    }
}
