//! Text-to-vector encoding behind a provider-agnostic trait.

mod http;

pub use http::HttpEncoder;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("cannot encode empty text")]
    EmptyInput,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model returned {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("expected {expected} embeddings in response, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, EncodingError>;

/// Capability interface for a sentence-embedding model.
///
/// Implementations must be deterministic for a pinned model version: the
/// same text always maps to the same vector, with no randomness of their
/// own. `encode_batch` exists purely for throughput and must produce the
/// same vectors per item as `encode` would.
pub trait Encoder: Send + Sync {
    /// Encode one text span into a fixed-dimension vector.
    ///
    /// Fails with [`EncodingError::EmptyInput`] on empty or whitespace-only
    /// text; callers filter blank spans before encoding.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Encode a batch of spans. The default delegates to per-item `encode`.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }

    /// Dimensionality of every vector this encoder produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, for logging and compatibility checks.
    fn model_name(&self) -> &str;
}
