//! Error types for recallkit.
//!
//! `Error` is `Clone` so one failed computation can be reported to every
//! caller waiting on it.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Chunk {index} failed: {source}")]
    ChunkFailure {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Output length mismatch: expected {expected} results, got {actual}")]
    OutputLength { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

impl Error {
    /// Wrap a failure that happened while processing batch chunk `index`.
    pub fn chunk(index: usize, source: Error) -> Self {
        Self::ChunkFailure {
            index,
            source: Box::new(source),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Failed provider calls are never cached, so retrying them is always safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(_) => true,
            Self::ChunkFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
