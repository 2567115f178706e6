//! Deterministic in-process fakes shared across test modules.

use std::sync::Mutex;

use crate::embedding::{Encoder, EncodingError};
use crate::synthesizer::{GenerationError, Generator};

/// Encoder producing a bag-of-characters vector. Deterministic, so identical
/// text always encodes identically, and texts sharing characters score as
/// similar under cosine.
pub(crate) struct MockEncoder {
    dimensions: usize,
    fail_on: Option<String>,
    zero_on: Option<String>,
    fail_batches: bool,
}

impl MockEncoder {
    pub(crate) fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail_on: None,
            zero_on: None,
            fail_batches: false,
        }
    }

    /// Fail per-item encoding for texts containing this marker.
    pub(crate) fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    /// Return an all-zero vector for texts containing this marker.
    pub(crate) fn zero_on(mut self, marker: &str) -> Self {
        self.zero_on = Some(marker.to_string());
        self
    }

    /// Make every batch call fail, forcing the per-item fallback.
    pub(crate) fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }
}

impl Encoder for MockEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        if text.trim().is_empty() {
            return Err(EncodingError::EmptyInput);
        }
        if let Some(marker) = &self.fail_on {
            if text.contains(marker) {
                return Err(EncodingError::Api {
                    status: 500,
                    message: format!("refusing text containing {marker:?}"),
                });
            }
        }
        if let Some(marker) = &self.zero_on {
            if text.contains(marker) {
                return Ok(vec![0.0; self.dimensions]);
            }
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for ch in text.chars() {
            vector[(ch as usize) % self.dimensions] += 1.0;
        }
        Ok(vector)
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        if self.fail_batches {
            return Err(EncodingError::Api {
                status: 503,
                message: "batch endpoint unavailable".to_string(),
            });
        }
        texts.iter().map(|t| self.encode(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-bag-of-chars"
    }
}

/// Generator replaying a scripted sequence of outcomes while recording every
/// prompt it was handed. Clones share state, so a test can keep a handle
/// while the synthesizer owns the boxed copy.
#[derive(Clone)]
pub(crate) struct MockGenerator {
    inner: std::sync::Arc<MockGeneratorState>,
}

struct MockGeneratorState {
    script: Mutex<Vec<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    /// Outcomes are consumed in order; the list is given first-call-first.
    pub(crate) fn scripted(outcomes: Vec<Result<String, GenerationError>>) -> Self {
        let mut script = outcomes;
        script.reverse();
        Self {
            inner: std::sync::Arc::new(MockGeneratorState {
                script: Mutex::new(script),
                prompts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn answering(text: &str) -> Self {
        Self::scripted(vec![Ok(text.to_string())])
    }

    pub(crate) fn call_count(&self) -> usize {
        self.inner.prompts.lock().unwrap().len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.inner.prompts.lock().unwrap().clone()
    }
}

impl Generator for MockGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.inner.prompts.lock().unwrap().push(prompt.to_string());
        self.inner
            .script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok("default answer".to_string()))
    }

    fn model_name(&self) -> &str {
        "mock-generator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_encoder_is_deterministic() {
        let encoder = MockEncoder::new(16);
        let a = encoder.encode("the same sentence twice").unwrap();
        let b = encoder.encode("the same sentence twice").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_batch_matches_per_item_encode() {
        let encoder = MockEncoder::new(16);
        let texts = vec![
            "first span".to_string(),
            "second span".to_string(),
            "third span".to_string(),
        ];

        let batched = encoder.encode_batch(&texts).unwrap();
        for (text, vector) in texts.iter().zip(batched.iter()) {
            assert_eq!(vector, &encoder.encode(text).unwrap());
        }
    }

    #[test]
    fn test_mock_encoder_rejects_blank_input() {
        let encoder = MockEncoder::new(16);
        assert!(matches!(
            encoder.encode("  \n "),
            Err(EncodingError::EmptyInput)
        ));
    }
}
