//! Shared data models for documents, chunks, and answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A source document as handed over by the ingestion side.
///
/// Immutable once stored; it disappears only through explicit removal,
/// which also drops its chunks and index entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    /// Human-readable origin, e.g. the uploaded filename.
    pub source: String,
    /// Raw extracted text.
    pub content: String,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded span of a document's text, the atomic retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position of this chunk within its document.
    pub seq: u32,
    /// Start offset into the document content, in characters.
    pub start_offset: usize,
    /// End offset (exclusive), in characters.
    pub end_offset: usize,
    pub content: String,
}

impl Chunk {
    /// Create a new chunk with a generated ID.
    pub fn new(
        document_id: Uuid,
        seq: u32,
        start_offset: usize,
        end_offset: usize,
        content: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            seq,
            start_offset,
            end_offset,
            content,
        }
    }
}

/// Lookup key held by the vector index. Carries no chunk text; the text
/// stays in the store so the two cannot diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRef {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
}

impl ChunkRef {
    pub fn new(chunk_id: Uuid, document_id: Uuid) -> Self {
        Self {
            chunk_id,
            document_id,
        }
    }
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Source label of the owning document.
    pub source: String,
    /// Cosine similarity against the query, in [-1, 1].
    pub score: f32,
}

/// Attribution for one excerpt that grounded an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub document_id: Uuid,
    pub source: String,
    pub chunk_id: Uuid,
    pub score: f32,
}

/// A composed answer with the excerpts that back it.
///
/// `grounded` is false only for the fixed no-context answer returned when
/// retrieval came back empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub grounded: bool,
}
