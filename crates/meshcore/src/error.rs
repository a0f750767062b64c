//! Shared error type for the core event model and Bloom filter.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Bloom merge attempted across filters with differing (m, k).
    #[error("bloom shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Bloom header failed bounds validation on deserialize.
    #[error("malformed bloom filter: {0}")]
    MalformedBloom(String),

    #[error("missing required field: {0}")]
    MissingField(String),
}
