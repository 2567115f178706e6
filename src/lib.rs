//! Grounded document search and question answering.
//!
//! Ingested text is chunked, embedded, and indexed; a query embeds the
//! question, pulls the closest chunks back out, and hands them to a language
//! model as grounding context for the final answer.

use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use uuid::Uuid;

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod index;
pub mod models;
pub mod retriever;
pub mod store;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::QuarryConfig;
pub use embedding::{Encoder, HttpEncoder};
pub use index::VectorIndex;
pub use models::{Answer, Chunk, ChunkRef, Citation, Document, ScoredChunk};
pub use retriever::{IngestReport, Retriever, RetrieverOptions};
pub use store::DocumentStore;
pub use synthesizer::{ChatGenerator, Generator, Synthesizer, NO_CONTEXT_ANSWER};

use embedding::EncodingError;
use retriever::RetrieverError;
use store::StoreError;
use synthesizer::{GenerationError, SynthesizerOptions};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("encoder error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("retrieval error: {0}")]
    Retriever(#[from] RetrieverError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Counts over the corpus and the live index.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub document_count: u64,
    pub chunk_count: u64,
    pub index_entries: usize,
    pub dimensions: usize,
}

/// Everything wired together: store, index, encoder, and generator.
///
/// Safe to share across threads; searches run concurrently while ingestion
/// takes the writer side of the index lock.
pub struct Engine {
    store: Arc<Mutex<DocumentStore>>,
    retriever: Retriever,
    synthesizer: Synthesizer,
    top_k: usize,
}

impl Engine {
    /// Build an engine from configuration, with the HTTP-backed encoder and
    /// generator.
    pub fn new(config: &QuarryConfig) -> Result<Self> {
        let store = match &config.storage.db_path {
            Some(path) => DocumentStore::open(path)?,
            None => DocumentStore::open_in_memory()?,
        };
        let encoder = HttpEncoder::new(&config.embedding)?;
        let generator = ChatGenerator::new(&config.generation)?;
        Self::with_components(store, Box::new(encoder), Box::new(generator), config)
    }

    /// Convenience constructor: load a TOML config file and build from it.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let config = QuarryConfig::load(path)?;
        Self::new(&config)
    }

    /// Assemble an engine from explicit components, e.g. a different
    /// encoder or generator implementation.
    pub fn with_components(
        store: DocumentStore,
        encoder: Box<dyn Encoder>,
        generator: Box<dyn Generator>,
        config: &QuarryConfig,
    ) -> Result<Self> {
        let store = Arc::new(Mutex::new(store));
        let index = VectorIndex::new(encoder.dimensions());
        let retriever = Retriever::new(
            Arc::clone(&store),
            index,
            encoder,
            RetrieverOptions {
                chunk_size: config.chunking.chunk_size,
                overlap: config.chunking.overlap,
                min_score: config.retrieval.min_score,
                max_context_chars: config.retrieval.max_context_chars,
            },
        )?;

        // Pick up whatever an earlier run left in the store.
        let restored = retriever.load_index()?;
        if restored > 0 {
            log::info!("restored {} index entries from the store", restored);
        }

        let synthesizer = Synthesizer::new(
            generator,
            SynthesizerOptions {
                max_attempts: config.generation.max_attempts,
                max_context_chars: config.retrieval.max_context_chars,
                ..SynthesizerOptions::default()
            },
        );

        Ok(Self {
            store,
            retriever,
            synthesizer,
            top_k: config.retrieval.top_k,
        })
    }

    /// Ingest raw document text under the given or a fresh ID.
    pub fn ingest_text(
        &self,
        document_id: Option<Uuid>,
        source: &str,
        text: &str,
    ) -> Result<IngestReport> {
        let id = document_id.unwrap_or_else(Uuid::new_v4);
        Ok(self.retriever.ingest(id, source, text)?)
    }

    /// Retrieve grounding excerpts and compose an answer.
    ///
    /// With no relevant excerpts this returns the fixed no-context answer
    /// (`grounded == false`); a generation failure after retries comes back
    /// as an error, so the two cases stay distinguishable.
    pub fn ask(&self, question: &str, top_k: Option<usize>) -> Result<Answer> {
        let results = self
            .retriever
            .retrieve(question, top_k.unwrap_or(self.top_k))?;
        Ok(self.synthesizer.synthesize(question, &results)?)
    }

    /// Semantic retrieval without the generation step.
    pub fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ScoredChunk>> {
        Ok(self
            .retriever
            .retrieve(query, top_k.unwrap_or(self.top_k))?)
    }

    /// Plain substring search over stored document text.
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        let store = self.store.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(store.keyword_search(query, limit)?)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let store = self.store.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(store.list_documents()?)
    }

    pub fn get_document(&self, id: Uuid) -> Result<Document> {
        let store = self.store.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(store.get_document(id)?)
    }

    /// Remove a document, its chunks, and its index entries.
    pub fn remove_document(&self, id: Uuid) -> Result<usize> {
        Ok(self.retriever.remove_document(id)?)
    }

    /// Rebuild the in-memory index from vectors in the store.
    pub fn rebuild_index(&self) -> Result<usize> {
        Ok(self.retriever.load_index()?)
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let store_stats = {
            let store = self.store.lock().map_err(|_| EngineError::LockPoisoned)?;
            store.stats()?
        };
        Ok(EngineStats {
            document_count: store_stats.document_count,
            chunk_count: store_stats.chunk_count,
            index_entries: self.retriever.index().len(),
            dimensions: self.retriever.index().dimensions(),
        })
    }
}
