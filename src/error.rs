use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously to callers.
///
/// Failures local to a single test invocation never show up here; the runner
/// folds them into the returned result instead (see [`crate::runner::RunFailure`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported export format: {0} (expected json, csv or html)")]
    UnsupportedFormat(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Archive I/O error at {}: {source}", path.display())]
    ArchiveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn archive_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ArchiveIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
