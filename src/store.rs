//! SQLite-backed persistence for documents, chunks, and their vectors.
//!
//! The store is the source of truth: chunk text lives here and the vector
//! index only holds lookup keys into it. Stored vectors exist so the
//! in-memory index can be rebuilt after a restart without re-encoding.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Chunk, ChunkRef, Document};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored ID: {0}")]
    Id(#[from] uuid::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("chunk not found: {0}")]
    ChunkNotFound(Uuid),

    #[error("chunk count ({chunks}) doesn't match vector count ({vectors})")]
    CountMismatch { chunks: usize, vectors: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A chunk joined with its owning document's source label.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub source: String,
}

/// Counts over the stored corpus.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub document_count: u64,
    pub chunk_count: u64,
}

pub struct DocumentStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl DocumentStore {
    /// Open (or create) a store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn,
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// Open a store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn,
            db_path: None,
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                content TEXT NOT NULL,
                ingested_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                content TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            -- Vectors stored as little-endian f32 blobs so the in-memory
            -- index can be rebuilt without re-encoding.
            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                dimensions INTEGER NOT NULL,
                FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);
            "#,
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Insert a document with its chunks and vectors in one transaction.
    ///
    /// Any previous state under the same document ID is replaced within the
    /// same transaction, so a re-ingest is atomic too.
    pub fn insert_document(
        &mut self,
        document: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(StoreError::CountMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        let tx = self.conn.transaction()?;
        let doc_id = document.id.to_string();

        tx.execute(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?1)",
            params![doc_id],
        )?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![doc_id])?;
        tx.execute("DELETE FROM documents WHERE id = ?1", params![doc_id])?;

        tx.execute(
            "INSERT INTO documents (id, source, content, ingested_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                doc_id,
                document.source,
                document.content,
                document.ingested_at.to_rfc3339(),
            ],
        )?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            tx.execute(
                "INSERT INTO chunks (id, document_id, seq, start_offset, end_offset, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chunk.id.to_string(),
                    chunk.document_id.to_string(),
                    chunk.seq,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                    chunk.content,
                ],
            )?;
            tx.execute(
                "INSERT INTO embeddings (chunk_id, embedding, dimensions) VALUES (?1, ?2, ?3)",
                params![
                    chunk.id.to_string(),
                    vector_to_blob(vector),
                    vector.len() as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Result<Document> {
        let row = self
            .conn
            .query_row(
                "SELECT id, source, content, ingested_at FROM documents WHERE id = ?1",
                params![id.to_string()],
                document_row,
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => StoreError::DocumentNotFound(id),
                other => StoreError::Sqlite(other),
            })?;
        parse_document(row)
    }

    pub fn document_exists(&self, id: Uuid) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All documents, most recently ingested first.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, source, content, ingested_at FROM documents ORDER BY ingested_at DESC")?;
        let rows = stmt
            .query_map([], document_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(parse_document).collect()
    }

    /// Remove a document with its chunks and vectors.
    ///
    /// Returns the IDs of the removed chunks so the caller can cascade the
    /// removal into the vector index.
    pub fn delete_document(&mut self, id: Uuid) -> Result<Vec<Uuid>> {
        let tx = self.conn.transaction()?;
        let doc_id = id.to_string();

        let chunk_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
            let rows = stmt
                .query_map(params![doc_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        tx.execute(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?1)",
            params![doc_id],
        )?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![doc_id])?;
        let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![doc_id])?;
        tx.commit()?;

        if removed == 0 {
            return Err(StoreError::DocumentNotFound(id));
        }
        chunk_ids
            .iter()
            .map(|raw| Uuid::parse_str(raw).map_err(StoreError::from))
            .collect()
    }

    /// Resolve a chunk reference to its text and source label.
    pub fn get_chunk(&self, id: Uuid) -> Result<ChunkRecord> {
        let row = self
            .conn
            .query_row(
                "SELECT c.id, c.document_id, c.seq, c.start_offset, c.end_offset, c.content, d.source
                 FROM chunks c JOIN documents d ON c.document_id = d.id
                 WHERE c.id = ?1",
                params![id.to_string()],
                chunk_row,
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => StoreError::ChunkNotFound(id),
                other => StoreError::Sqlite(other),
            })?;
        parse_chunk(row)
    }

    /// A document's chunks in sequence order.
    pub fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.document_id, c.seq, c.start_offset, c.end_offset, c.content, d.source
             FROM chunks c JOIN documents d ON c.document_id = d.id
             WHERE c.document_id = ?1 ORDER BY c.seq",
        )?;
        let rows = stmt
            .query_map(params![document_id.to_string()], chunk_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| parse_chunk(row).map(|record| record.chunk))
            .collect()
    }

    /// Every stored vector with its chunk reference, in insertion order.
    pub fn all_embeddings(&self) -> Result<Vec<(ChunkRef, Vec<f32>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.document_id, e.embedding
             FROM embeddings e JOIN chunks c ON e.chunk_id = c.id
             ORDER BY c.rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(chunk_id, document_id, blob)| {
                Ok((
                    ChunkRef::new(Uuid::parse_str(&chunk_id)?, Uuid::parse_str(&document_id)?),
                    blob_to_vector(&blob),
                ))
            })
            .collect()
    }

    /// Plain substring search over document content, newest first.
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source, content, ingested_at FROM documents
             WHERE content LIKE ?1 ORDER BY ingested_at DESC LIMIT ?2",
        )?;
        let pattern = format!("%{}%", query);
        let rows = stmt
            .query_map(params![pattern, limit as i64], document_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(parse_document).collect()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let document_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunk_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        Ok(StoreStats {
            document_count: document_count as u64,
            chunk_count: chunk_count as u64,
        })
    }
}

type DocumentRow = (String, String, String, String);
type ChunkRow = (String, String, u32, i64, i64, String, String);

fn document_row(row: &rusqlite::Row) -> rusqlite::Result<DocumentRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn parse_document((id, source, content, ingested_at): DocumentRow) -> Result<Document> {
    Ok(Document {
        id: Uuid::parse_str(&id)?,
        source,
        content,
        ingested_at: DateTime::parse_from_rfc3339(&ingested_at)?.with_timezone(&Utc),
    })
}

fn chunk_row(row: &rusqlite::Row) -> rusqlite::Result<ChunkRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parse_chunk(
    (id, document_id, seq, start_offset, end_offset, content, source): ChunkRow,
) -> Result<ChunkRecord> {
    Ok(ChunkRecord {
        chunk: Chunk {
            id: Uuid::parse_str(&id)?,
            document_id: Uuid::parse_str(&document_id)?,
            seq,
            start_offset: start_offset as usize,
            end_offset: end_offset as usize,
            content,
        },
        source,
    })
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
