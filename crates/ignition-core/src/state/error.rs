//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or saving cluster state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing a state file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The snapshot exists but the bundle blobs it depends on do not.
    #[error("Saved state is incomplete, missing {missing:?}; run `ignite reset` to start over")]
    PartialState { missing: Vec<String> },

    /// The store rejected the write.
    #[error("Persistence rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Result type alias for state store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
