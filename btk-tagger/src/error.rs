//! Error types for btk-tagger
//!
//! Per-provider and per-post failures are contained inside the run and only
//! show up in logs and statistics. [`TaggerError`] covers the conditions that
//! stop a run before any post is processed.

use thiserror::Error;

use crate::board::BoardError;

/// Run-fatal error
#[derive(Debug, Error)]
pub enum TaggerError {
    /// Configuration missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ML tagger's model or vocabulary could not be loaded
    #[error("Failed to load ML model: {0}")]
    ModelLoad(String),

    /// The board did not answer the startup check
    #[error("Board unreachable at {url}: {source}")]
    BoardUnreachable {
        url: String,
        #[source]
        source: BoardError,
    },

    /// Board error outside per-post processing (e.g. listing the query)
    #[error("Board error: {0}")]
    Board(#[from] BoardError),

    /// Upload path scan failed
    #[error("Scan error: {0}")]
    Scan(#[from] crate::services::ScanError),

    /// btk-common error
    #[error("Common error: {0}")]
    Common(#[from] btk_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for run-level operations
pub type TaggerResult<T> = Result<T, TaggerError>;
