//! Splits document text into overlapping fixed-size spans for embedding.

use thiserror::Error;
use uuid::Uuid;

use crate::models::Chunk;

/// Default span size in characters (roughly 512 tokens at 4 chars/token).
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Default overlap carried between consecutive spans.
pub const DEFAULT_OVERLAP: usize = 200;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ChunkerError>;

/// Split text into overlapping spans using a sliding window over characters.
///
/// Every span but the last is exactly `chunk_size` characters; consecutive
/// spans share the last `overlap` characters of the prior span, so the input
/// is covered with no gaps. Returns `(content, start, end)` tuples with
/// character offsets, end exclusive.
///
/// Empty text yields an empty vec. Text no longer than `chunk_size` yields a
/// single span covering the whole input.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<(String, usize, usize)>> {
    if chunk_size == 0 {
        return Err(ChunkerError::InvalidConfig(
            "chunk size must be positive".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(ChunkerError::InvalidConfig(format!(
            "overlap ({}) must be smaller than chunk size ({})",
            overlap, chunk_size
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let stride = chunk_size - overlap;
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(chars.len());
        spans.push((chars[start..end].iter().collect(), start, end));
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    Ok(spans)
}

/// Chunk a document's content into ordered, offset-carrying chunks.
pub fn chunk_document(
    document_id: Uuid,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let spans = split(text, chunk_size, overlap)?;

    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(seq, (content, start, end))| {
            Chunk::new(document_id, seq as u32, start, end, content)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        let spans = split("", 100, 20).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_short_text_single_span() {
        let spans = split("Hello world", 100, 20).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], ("Hello world".to_string(), 0, 11));
    }

    #[test]
    fn test_exact_fit() {
        let text = "a".repeat(100);
        let spans = split(&text, 100, 20).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].1, 0);
        assert_eq!(spans[0].2, 100);
    }

    #[test]
    fn test_window_offsets() {
        let text: String = (0..250).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let spans = split(&text, 100, 20).unwrap();

        assert_eq!(spans.len(), 3);
        assert_eq!((spans[0].1, spans[0].2), (0, 100));
        assert_eq!((spans[1].1, spans[1].2), (80, 180));
        assert_eq!((spans[2].1, spans[2].2), (160, 250));
        for (content, start, end) in &spans {
            assert!(content.chars().count() <= 100);
            assert_eq!(content.chars().count(), end - start);
        }
    }

    #[test]
    fn test_overlap_reconstruction() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let overlap = 17;
        let spans = split(&text, 64, overlap).unwrap();

        let mut rebuilt: String = spans[0].0.clone();
        for (content, _, _) in &spans[1..] {
            rebuilt.extend(content.chars().skip(overlap));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_multibyte_offsets_are_character_counts() {
        let text = "héllo wörld ünïcode ".repeat(10);
        let spans = split(&text, 50, 10).unwrap();

        let total: usize = text.chars().count();
        assert_eq!(spans.last().unwrap().2, total);
        for (content, start, end) in &spans {
            assert_eq!(content.chars().count(), end - start);
        }
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(matches!(
            split("text", 50, 50),
            Err(ChunkerError::InvalidConfig(_))
        ));
        assert!(matches!(
            split("text", 50, 80),
            Err(ChunkerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        assert!(matches!(
            split("text", 0, 0),
            Err(ChunkerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_chunk_document_sequence() {
        let doc_id = Uuid::new_v4();
        let text = "x".repeat(250);
        let chunks = chunk_document(doc_id, &text, 100, 20).unwrap();

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.seq, i as u32);
            assert_eq!(chunk.document_id, doc_id);
        }
        assert!(chunks.windows(2).all(|w| w[0].start_offset < w[1].start_offset));
    }
}
