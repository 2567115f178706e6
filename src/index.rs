//! In-memory vector index with top-k cosine similarity search.

use std::cmp::Ordering;
use std::sync::RwLock;

use thiserror::Error;
use uuid::Uuid;

use crate::models::ChunkRef;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot index a zero-magnitude vector")]
    ZeroVector,

    #[error("index lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, IndexError>;

struct Entry {
    vector: Vec<f32>,
    chunk_ref: ChunkRef,
}

/// Flat index over L2-normalized vectors.
///
/// Search is an exact scan ranked by inner product, which equals cosine
/// similarity on normalized vectors. An exact scan trivially satisfies the
/// top-k contract and is fast enough for a corpus of thousands of chunks;
/// swapping in an ANN structure would change only this module. Point
/// deletion is an O(n) retain; the fallback for anything costlier is
/// [`VectorIndex::clear`] plus re-insertion from stored vectors.
///
/// Entries live behind a read-write lock: searches share the lock and never
/// block each other, while inserts and removals take it exclusively, so a
/// concurrent reader sees either the pre-write or post-write view and never
/// a half-written entry.
pub struct VectorIndex {
    dimensions: usize,
    entries: RwLock<Vec<Entry>>,
}

impl VectorIndex {
    /// Create an empty index accepting vectors of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a vector under its chunk reference.
    ///
    /// The vector is L2-normalized on the way in. Rejects vectors whose
    /// dimension differs from the index's and vectors with zero magnitude.
    pub fn insert(&self, vector: Vec<f32>, chunk_ref: ChunkRef) -> Result<()> {
        self.check_dimension(vector.len())?;
        let vector = normalize(vector).ok_or(IndexError::ZeroVector)?;

        let mut entries = self.entries.write().map_err(|_| IndexError::LockPoisoned)?;
        entries.push(Entry { vector, chunk_ref });
        Ok(())
    }

    /// Rank entries by similarity to `query`, best first.
    ///
    /// Returns at most `k` results; fewer when the index holds fewer entries
    /// or a `threshold` cuts the tail. An empty index returns an empty vec,
    /// since "no documents yet" is a normal state. Equal scores keep
    /// insertion order, so results are deterministic.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<(ChunkRef, f32)>> {
        self.check_dimension(query.len())?;
        let query = normalize(query.to_vec()).ok_or(IndexError::ZeroVector)?;

        let entries = self.entries.read().map_err(|_| IndexError::LockPoisoned)?;
        if entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(ChunkRef, f32)> = entries
            .iter()
            .map(|entry| (entry.chunk_ref, dot(&entry.vector, &query)))
            .collect();

        // Stable sort keeps insertion order for equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if let Some(min) = threshold {
            scored.retain(|(_, score)| *score >= min);
        }
        scored.truncate(k);

        Ok(scored)
    }

    /// Remove the entry for one chunk. Returns whether anything was removed.
    pub fn remove(&self, chunk_id: Uuid) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| IndexError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|entry| entry.chunk_ref.chunk_id != chunk_id);
        Ok(entries.len() < before)
    }

    /// Remove every entry belonging to a document. Returns the count removed.
    pub fn remove_document(&self, document_id: Uuid) -> Result<usize> {
        let mut entries = self.entries.write().map_err(|_| IndexError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|entry| entry.chunk_ref.document_id != document_id);
        Ok(before - entries.len())
    }

    /// Drop all entries, keeping the dimension.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| IndexError::LockPoisoned)?;
        entries.clear();
        Ok(())
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }
}

fn normalize(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    for x in &mut vector {
        *x /= norm;
    }
    Some(vector)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
