//! Error types for devconsole-store

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing definition files
#[derive(Error, Debug)]
pub enum StoreError {
    /// A definition with this ID already has a file on disk
    #[error("{kind} with ID '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    /// The evaluator type ID is not in the catalogue
    #[error("Invalid evaluator type: {0}")]
    InvalidEvaluatorType(String),

    /// Filesystem error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization failed for {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
