//! Formats retrieved excerpts into a grounding context and delegates the
//! final wording to an external language model.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::models::{Answer, Citation, ScoredChunk};

/// Fixed response when retrieval produced nothing to ground an answer on.
/// Returned without calling the model, so it can never be a hallucination
/// dressed up as a grounded answer.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant context was found in the ingested documents.";

const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Error, Debug)]
pub enum GenerationError {
    /// The service hiccuped (timeout, rate limit, 5xx); retrying may help.
    #[error("language model call failed: {0}")]
    Transient(String),

    /// The request itself was rejected (bad key, bad input); retrying won't.
    #[error("language model rejected the request: {0}")]
    Permanent(String),

    #[error("could not generate an answer after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Boundary to the external language model.
///
/// Implementations enforce their own request timeout and map it to a
/// transient error. Calls have no side effects on the index, so retrying is
/// always safe.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Knobs for retry behavior and context sizing.
#[derive(Debug, Clone)]
pub struct SynthesizerOptions {
    /// Total attempts per answer, including the first.
    pub max_attempts: u32,
    /// Cap on total excerpt characters placed into the prompt.
    pub max_context_chars: usize,
    /// First retry delay; doubles per attempt up to a ceiling.
    pub initial_backoff: Duration,
}

impl Default for SynthesizerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_context_chars: 6000,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Composes grounded answers from retrieved excerpts.
pub struct Synthesizer {
    generator: Box<dyn Generator>,
    options: SynthesizerOptions,
}

impl Synthesizer {
    pub fn new(generator: Box<dyn Generator>, options: SynthesizerOptions) -> Self {
        Self { generator, options }
    }

    /// Build a grounding context from the excerpts and ask the model.
    ///
    /// An empty retrieval result short-circuits to [`NO_CONTEXT_ANSWER`]
    /// without touching the model. Transient model failures are retried
    /// with exponential backoff; exhausting the attempts surfaces as
    /// [`GenerationError::RetriesExhausted`], which callers can tell apart
    /// from the no-context case.
    pub fn synthesize(&self, question: &str, results: &[ScoredChunk]) -> Result<Answer> {
        if results.is_empty() {
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                grounded: false,
            });
        }

        let (context, citations) = self.build_context(results);
        let prompt = format!(
            "{context}Question: {question}\n\n\
             Answer the question using only the excerpts above. \
             If they do not contain the answer, say that the documents do not cover it."
        );

        let text = self.generate_with_retry(&prompt)?;
        Ok(Answer {
            text,
            citations,
            grounded: true,
        })
    }

    /// Render excerpts in rank order, skipping identical adjacent chunks
    /// from the same document and stopping once the character budget is
    /// spent. The top excerpt is always included.
    fn build_context(&self, results: &[ScoredChunk]) -> (String, Vec<Citation>) {
        let mut context = String::from("Relevant document excerpts:\n\n");
        let mut citations: Vec<Citation> = Vec::new();
        let mut budget = self.options.max_context_chars;
        let mut previous: Option<&ScoredChunk> = None;

        for scored in results {
            if let Some(prev) = previous {
                if prev.chunk.document_id == scored.chunk.document_id
                    && prev.chunk.content == scored.chunk.content
                {
                    continue;
                }
            }

            let len = scored.chunk.content.chars().count();
            if !citations.is_empty() && len > budget {
                break;
            }
            budget = budget.saturating_sub(len);

            context.push_str(&format!(
                "From {} (similarity: {:.3}):\n{}\n\n",
                scored.source, scored.score, scored.chunk.content
            ));
            citations.push(Citation {
                document_id: scored.chunk.document_id,
                source: scored.source.clone(),
                chunk_id: scored.chunk.id,
                score: scored.score,
            });
            previous = Some(scored);
        }

        (context, citations)
    }

    fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let attempts = self.options.max_attempts.max(1);
        let mut backoff = self.options.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.generator.generate(prompt) {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() => {
                    log::warn!(
                        "generation attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        err
                    );
                    last_error = err.to_string();
                    if attempt < attempts {
                        std::thread::sleep(backoff);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(GenerationError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

/// OpenAI-compatible chat-completions client.
pub struct ChatGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl ChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| GenerationError::Permanent(format!("HTTP client setup: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl Generator for ChatGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.trim());
        }

        let response = request.send().map_err(|err| {
            // Transport-level failures (timeouts, refused connections) are
            // worth retrying; the request itself may be fine.
            GenerationError::Transient(err.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = response
                .json()
                .map_err(|err| GenerationError::Permanent(format!("unexpected response: {err}")))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content)
                .ok_or_else(|| {
                    GenerationError::Permanent("response contained no choices".to_string())
                });
        }

        let message = response
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        let detail = format!("{status}: {message}");
        if status.as_u16() == 429 || status.is_server_error() {
            Err(GenerationError::Transient(detail))
        } else {
            Err(GenerationError::Permanent(detail))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
