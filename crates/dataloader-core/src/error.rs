//! Error types for Dataloader Core

use thiserror::Error;

/// Error produced while loading a key or a batch.
///
/// Results are read by many waiters, so the error is `Clone` and carries
/// rendered messages rather than boxed sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The resolver was dropped before producing a result
    #[error("Load canceled before a result was produced")]
    Canceled,

    #[error("Batch returned {actual} results for {expected} keys")]
    BatchLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, LoadError>;
