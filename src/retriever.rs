//! Ingestion and query-time retrieval over the store and vector index.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::chunker::{self, ChunkerError};
use crate::embedding::{Encoder, EncodingError};
use crate::index::{IndexError, VectorIndex};
use crate::models::{Chunk, ChunkRef, Document, ScoredChunk};
use crate::store::{DocumentStore, StoreError};

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("chunking failed: {0}")]
    Chunker(#[from] ChunkerError),

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("no chunk of document {0} could be encoded")]
    NothingEncoded(Uuid),
}

pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Tuning knobs for ingestion and retrieval.
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Drop results scoring below this, if set.
    pub min_score: Option<f32>,
    /// Cap on total characters across retrieved chunks.
    pub max_context_chars: usize,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            chunk_size: chunker::DEFAULT_CHUNK_SIZE,
            overlap: chunker::DEFAULT_OVERLAP,
            min_score: None,
            max_context_chars: 6000,
        }
    }
}

/// Outcome of one document ingestion.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub document_id: Uuid,
    /// Chunks stored and indexed.
    pub chunk_count: usize,
    /// Chunks dropped because they were blank or failed to encode.
    pub skipped_chunks: usize,
}

/// Orchestrates chunking and encoding at ingestion time, and query encoding
/// plus index lookup at query time. The single write path into the index.
pub struct Retriever {
    store: Arc<Mutex<DocumentStore>>,
    index: VectorIndex,
    encoder: Box<dyn Encoder>,
    options: RetrieverOptions,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Wire a retriever over its collaborators.
    ///
    /// The index dimension must match what the encoder produces; anything
    /// else is model/index version skew and is rejected up front.
    pub fn new(
        store: Arc<Mutex<DocumentStore>>,
        index: VectorIndex,
        encoder: Box<dyn Encoder>,
        options: RetrieverOptions,
    ) -> Result<Self> {
        if encoder.dimensions() != index.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimensions(),
                actual: encoder.dimensions(),
            }
            .into());
        }
        Ok(Self {
            store,
            index,
            encoder,
            options,
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn options(&self) -> &RetrieverOptions {
        &self.options
    }

    /// Chunk, encode, and index a document.
    ///
    /// Atomic from the caller's view: the document ends up fully indexed or
    /// not at all. Re-ingesting an existing ID replaces the previous state,
    /// so a retry after a failed attempt converges to the same result as a
    /// single successful ingest. Blank chunks and chunks the encoder
    /// rejects are skipped with a warning; they fail the ingest only when
    /// nothing at all could be encoded.
    pub fn ingest(&self, document_id: Uuid, source: &str, text: &str) -> Result<IngestReport> {
        let chunks = chunker::chunk_document(
            document_id,
            text,
            self.options.chunk_size,
            self.options.overlap,
        )?;

        let (encodable, mut skipped): (Vec<Chunk>, usize) = {
            let total = chunks.len();
            let kept: Vec<Chunk> = chunks
                .into_iter()
                .filter(|chunk| !chunk.content.trim().is_empty())
                .collect();
            let blank = total - kept.len();
            if blank > 0 {
                log::warn!(
                    "document {}: skipping {} blank chunk(s)",
                    document_id,
                    blank
                );
            }
            (kept, blank)
        };

        let (indexed, vectors) = self.encode_chunks(document_id, encodable, &mut skipped)?;

        // Catch model/index skew before any state changes.
        for vector in &vectors {
            if vector.len() != self.index.dimensions() {
                return Err(IndexError::DimensionMismatch {
                    expected: self.index.dimensions(),
                    actual: vector.len(),
                }
                .into());
            }
        }

        let document = Document {
            id: document_id,
            source: source.to_string(),
            content: text.to_string(),
            ingested_at: Utc::now(),
        };

        let mut store = self.store.lock().map_err(|_| RetrieverError::LockPoisoned)?;
        store.insert_document(&document, &indexed, &vectors)?;
        self.index.remove_document(document_id)?;

        for (chunk, vector) in indexed.iter().zip(vectors.into_iter()) {
            let chunk_ref = ChunkRef::new(chunk.id, document_id);
            if let Err(err) = self.index.insert(vector, chunk_ref) {
                // Roll back so the document returns to its pre-ingest state.
                log::warn!(
                    "document {}: index insert failed ({}), rolling back",
                    document_id,
                    err
                );
                let _ = self.index.remove_document(document_id);
                if let Err(rollback_err) = store.delete_document(document_id) {
                    log::error!(
                        "document {}: rollback delete failed: {}",
                        document_id,
                        rollback_err
                    );
                }
                return Err(err.into());
            }
        }

        log::info!(
            "document {}: indexed {} chunk(s), skipped {}",
            document_id,
            indexed.len(),
            skipped
        );

        Ok(IngestReport {
            document_id,
            chunk_count: indexed.len(),
            skipped_chunks: skipped,
        })
    }

    /// Encode chunk texts, batch first for throughput, then one by one so a
    /// single bad chunk cannot sink the whole document.
    fn encode_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<Chunk>,
        skipped: &mut usize,
    ) -> Result<(Vec<Chunk>, Vec<Vec<f32>>)> {
        if chunks.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        match self.encoder.encode_batch(&texts) {
            Ok(vectors) => Ok((chunks, vectors)),
            Err(batch_err) => {
                log::warn!(
                    "document {}: batch encoding failed ({}), retrying per chunk",
                    document_id,
                    batch_err
                );
                let mut kept = Vec::new();
                let mut vectors = Vec::new();
                for chunk in chunks {
                    match self.encoder.encode(&chunk.content) {
                        Ok(vector) => {
                            kept.push(chunk);
                            vectors.push(vector);
                        }
                        // Dimension skew is never a single-chunk problem.
                        Err(err @ EncodingError::DimensionMismatch { .. }) => {
                            return Err(err.into());
                        }
                        Err(err) => {
                            log::warn!(
                                "document {} chunk {}: encoding failed, skipping: {}",
                                document_id,
                                chunk.seq,
                                err
                            );
                            *skipped += 1;
                        }
                    }
                }
                if kept.is_empty() {
                    return Err(RetrieverError::NothingEncoded(document_id));
                }
                Ok((kept, vectors))
            }
        }
    }

    /// Encode the query and return the best-matching chunks, best first.
    ///
    /// Applies the configured score floor and stops adding chunks once the
    /// context character budget is spent (the top hit is always kept). An
    /// empty result is a normal outcome, not an error.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vector = self.encoder.encode(query)?;
        let hits = self
            .index
            .search(&query_vector, k, self.options.min_score)?;

        let store = self.store.lock().map_err(|_| RetrieverError::LockPoisoned)?;
        let mut results = Vec::new();
        let mut budget = self.options.max_context_chars;

        for (chunk_ref, score) in hits {
            let record = match store.get_chunk(chunk_ref.chunk_id) {
                Ok(record) => record,
                Err(StoreError::ChunkNotFound(id)) => {
                    log::warn!("index entry {} has no stored chunk, skipping", id);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let len = record.chunk.content.chars().count();
            if !results.is_empty() && len > budget {
                break;
            }
            budget = budget.saturating_sub(len);
            results.push(ScoredChunk {
                chunk: record.chunk,
                source: record.source,
                score,
            });
        }

        Ok(results)
    }

    /// Remove a document everywhere: store, chunks, and index entries.
    pub fn remove_document(&self, document_id: Uuid) -> Result<usize> {
        let mut store = self.store.lock().map_err(|_| RetrieverError::LockPoisoned)?;
        let chunk_ids = store.delete_document(document_id)?;
        self.index.remove_document(document_id)?;
        log::info!(
            "document {}: removed with {} chunk(s)",
            document_id,
            chunk_ids.len()
        );
        Ok(chunk_ids.len())
    }

    /// Reload the index from stored vectors, e.g. after a restart.
    pub fn load_index(&self) -> Result<usize> {
        let embeddings = {
            let store = self.store.lock().map_err(|_| RetrieverError::LockPoisoned)?;
            store.all_embeddings()?
        };

        self.index.clear()?;
        let count = embeddings.len();
        for (chunk_ref, vector) in embeddings {
            self.index.insert(vector, chunk_ref)?;
        }
        log::debug!("index loaded with {} entries", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockEncoder;

    fn retriever(encoder: MockEncoder) -> Retriever {
        let store = Arc::new(Mutex::new(DocumentStore::open_in_memory().unwrap()));
        let index = VectorIndex::new(encoder.dimensions());
        Retriever::new(
            store,
            index,
            Box::new(encoder),
            RetrieverOptions {
                chunk_size: 40,
                overlap: 10,
                ..RetrieverOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_ingest_then_retrieve_own_chunk_at_rank_zero() {
        let r = retriever(MockEncoder::new(16));
        let doc_id = Uuid::new_v4();
        r.ingest(doc_id, "a.txt", "aaaa aaaa aaaa aaaa").unwrap();
        r.ingest(Uuid::new_v4(), "b.txt", "zzzz zzzz zzzz zzzz").unwrap();

        let results = r.retrieve("aaaa aaaa aaaa aaaa", 5).unwrap();
        assert_eq!(results[0].chunk.document_id, doc_id);
        assert_eq!(results[0].source, "a.txt");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_retrieve_returns_at_most_available() {
        let r = retriever(MockEncoder::new(16));
        r.ingest(Uuid::new_v4(), "a.txt", "short text").unwrap();

        let results = r.retrieve("short text", 5).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_retrieve_on_empty_index() {
        let r = retriever(MockEncoder::new(16));
        assert!(r.retrieve("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let r = retriever(MockEncoder::new(16));
        let doc_id = Uuid::new_v4();
        let text = "the quick brown fox jumps over the lazy dog again and again";

        let first = r.ingest(doc_id, "a.txt", text).unwrap();
        let second = r.ingest(doc_id, "a.txt", text).unwrap();

        assert_eq!(first.chunk_count, second.chunk_count);
        assert_eq!(r.index().len(), second.chunk_count);
        let store = r.store.lock().unwrap();
        assert_eq!(store.stats().unwrap().document_count, 1);
        assert_eq!(store.stats().unwrap().chunk_count, second.chunk_count as u64);
    }

    #[test]
    fn test_bad_chunks_are_skipped_not_fatal() {
        // Batch fails, per-chunk retry drops only the poisoned chunk.
        let encoder = MockEncoder::new(16).failing_on("POISON").failing_batches();
        let r = retriever(encoder);
        let doc_id = Uuid::new_v4();
        let text = format!("{}POISONx{}", "a".repeat(39), "b".repeat(50));

        let report = r.ingest(doc_id, "a.txt", &text).unwrap();
        assert!(report.skipped_chunks >= 1);
        assert!(report.chunk_count >= 1);
        assert_eq!(r.index().len(), report.chunk_count);
    }

    #[test]
    fn test_all_chunks_failing_aborts_ingest() {
        let encoder = MockEncoder::new(16).failing_on("a").failing_batches();
        let r = retriever(encoder);
        let doc_id = Uuid::new_v4();

        let err = r.ingest(doc_id, "a.txt", "aaaa aaaa aaaa").unwrap_err();
        assert!(matches!(err, RetrieverError::NothingEncoded(id) if id == doc_id));

        let store = r.store.lock().unwrap();
        assert_eq!(store.stats().unwrap().document_count, 0);
        assert!(r.index.is_empty());
    }

    #[test]
    fn test_index_failure_rolls_back_store() {
        // A zero vector passes the dimension check but is rejected by the
        // index, exercising the rollback path after the store write.
        let encoder = MockEncoder::new(16).zero_on("DEAD");
        let r = retriever(encoder);
        let doc_id = Uuid::new_v4();
        let text = format!("{} DEAD {}", "a".repeat(40), "b".repeat(40));

        let err = r.ingest(doc_id, "a.txt", &text).unwrap_err();
        assert!(matches!(err, RetrieverError::Index(IndexError::ZeroVector)));

        let store = r.store.lock().unwrap();
        assert!(!store.document_exists(doc_id).unwrap());
        assert!(r.index.is_empty());
    }

    #[test]
    fn test_remove_document_cascades_into_index() {
        let r = retriever(MockEncoder::new(16));
        let doc_id = Uuid::new_v4();
        let text = "searchable content about reactors and cooling towers";
        r.ingest(doc_id, "a.txt", text).unwrap();
        r.ingest(Uuid::new_v4(), "b.txt", "unrelated gardening notes").unwrap();

        let removed = r.remove_document(doc_id).unwrap();
        assert!(removed >= 1);

        let results = r.retrieve(text, 10).unwrap();
        assert!(results.iter().all(|s| s.chunk.document_id != doc_id));
    }

    #[test]
    fn test_min_score_filters_results() {
        let store = Arc::new(Mutex::new(DocumentStore::open_in_memory().unwrap()));
        let index = VectorIndex::new(16);
        let r = Retriever::new(
            store,
            index,
            Box::new(MockEncoder::new(16)),
            RetrieverOptions {
                chunk_size: 40,
                overlap: 10,
                min_score: Some(0.99),
                ..RetrieverOptions::default()
            },
        )
        .unwrap();

        r.ingest(Uuid::new_v4(), "a.txt", "aaaa aaaa").unwrap();
        r.ingest(Uuid::new_v4(), "b.txt", "zzzz zzzz").unwrap();

        let results = r.retrieve("aaaa aaaa", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score >= 0.99);
    }

    #[test]
    fn test_context_budget_caps_results() {
        let store = Arc::new(Mutex::new(DocumentStore::open_in_memory().unwrap()));
        let index = VectorIndex::new(16);
        let r = Retriever::new(
            store,
            index,
            Box::new(MockEncoder::new(16)),
            RetrieverOptions {
                chunk_size: 40,
                overlap: 10,
                max_context_chars: 50,
                ..RetrieverOptions::default()
            },
        )
        .unwrap();

        // Three 40-char chunks; only one fits the 50-char budget.
        r.ingest(Uuid::new_v4(), "a.txt", &"ab".repeat(50)).unwrap();

        let results = r.retrieve(&"ab".repeat(20), 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_load_index_restores_search_without_reencoding() {
        let store = Arc::new(Mutex::new(DocumentStore::open_in_memory().unwrap()));
        let r = Retriever::new(
            Arc::clone(&store),
            VectorIndex::new(16),
            Box::new(MockEncoder::new(16)),
            RetrieverOptions {
                chunk_size: 40,
                overlap: 10,
                ..RetrieverOptions::default()
            },
        )
        .unwrap();
        let doc_id = Uuid::new_v4();
        r.ingest(doc_id, "a.txt", "persistent knowledge base entry").unwrap();

        // A second retriever over the same store, fresh empty index.
        let r2 = Retriever::new(
            store,
            VectorIndex::new(16),
            Box::new(MockEncoder::new(16)),
            RetrieverOptions {
                chunk_size: 40,
                overlap: 10,
                ..RetrieverOptions::default()
            },
        )
        .unwrap();
        assert!(r2.retrieve("persistent knowledge", 5).unwrap().is_empty());

        let loaded = r2.load_index().unwrap();
        assert_eq!(loaded, r.index().len());
        let results = r2.retrieve("persistent knowledge base entry", 5).unwrap();
        assert_eq!(results[0].chunk.document_id, doc_id);
    }

    #[test]
    fn test_dimension_skew_rejected_at_construction() {
        let store = Arc::new(Mutex::new(DocumentStore::open_in_memory().unwrap()));
        let err = Retriever::new(
            store,
            VectorIndex::new(384),
            Box::new(MockEncoder::new(16)),
            RetrieverOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::Index(IndexError::DimensionMismatch { .. })
        ));
    }
}
