//! Engine configuration, loadable from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration for an [`crate::Engine`].
///
/// Every section has working defaults; a config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
}

impl QuarryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Where document and chunk data lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
}

/// Sliding-window parameters for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Sentence-embedding model settings.
///
/// The encoder speaks the OpenAI-compatible `/embeddings` protocol, which
/// local servers (Ollama, LM Studio) and hosted providers share. Vectors are
/// only comparable within one model version, so `model` and `dimensions`
/// must match whatever produced the vectors already in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of the embeddings endpoint, without the `/embeddings` suffix.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Vector dimensionality the model produces.
    pub dimensions: usize,
    /// Bearer token, if the endpoint requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Inputs longer than this are truncated before encoding, with a warning.
    pub max_input_chars: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "all-minilm".to_string(),
            dimensions: 384,
            api_key: None,
            max_input_chars: 8000,
            timeout_secs: 30,
        }
    }
}

/// Language-model settings for answer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Bearer token, if the endpoint requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts per answer before giving up on transient failures.
    pub max_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "compound-beta".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 500,
            timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

/// Query-time ranking and filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// How many chunks to retrieve per query.
    pub top_k: usize,
    /// Drop results scoring below this, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    /// Cap on total characters handed to the generation step.
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: None,
            max_context_chars: 6000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuarryConfig::default();
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.storage.db_path.is_none());
        assert!(config.chunking.overlap < config.chunking.chunk_size);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: QuarryConfig = toml::from_str(
            r#"
            [embedding]
            model = "text-embedding-3-small"
            dimensions = 1536

            [retrieval]
            top_k = 3
            min_score = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.min_score, Some(0.25));
        // Untouched sections keep their defaults.
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.chunking.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.toml");
        fs::write(&path, "[generation]\nmodel = \"llama-3.1-8b-instant\"\n").unwrap();

        let config = QuarryConfig::load(&path).unwrap();
        assert_eq!(config.generation.model, "llama-3.1-8b-instant");
    }
}
