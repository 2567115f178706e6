//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

use super::{Encoder, EncodingError, Result};

/// Encoder backed by an OpenAI-compatible embeddings endpoint.
///
/// Over-long inputs are truncated to the configured character budget before
/// the request goes out; truncation is logged so the information loss stays
/// observable.
pub struct HttpEncoder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    max_input_chars: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_input_chars: config.max_input_chars,
        })
    }

    /// Trim, reject blanks, and truncate over-long input at a char boundary.
    fn prepare<'a>(&self, text: &'a str) -> Result<&'a str> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EncodingError::EmptyInput);
        }

        match trimmed.char_indices().nth(self.max_input_chars) {
            Some((byte_end, _)) => {
                log::warn!(
                    "truncating {}-char input to {} chars before embedding",
                    trimmed.chars().count(),
                    self.max_input_chars
                );
                Ok(&trimmed[..byte_end])
            }
            None => Ok(trimmed),
        }
    }

    fn request(&self, input: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.trim());
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EncodingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbeddingResponse = response.json()?;
        if parsed.data.len() != expected {
            return Err(EncodingError::BatchSizeMismatch {
                expected,
                actual: parsed.data.len(),
            });
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(EncodingError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }

        Ok(vectors)
    }
}

impl Encoder for HttpEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let input = self.prepare(text)?;
        let mut vectors = self.request(vec![input])?;
        vectors.pop().ok_or(EncodingError::BatchSizeMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = texts
            .iter()
            .map(|t| self.prepare(t))
            .collect::<Result<Vec<_>>>()?;
        self.request(inputs)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
