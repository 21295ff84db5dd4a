//! Paragraph chunker with overlap.
//!
//! Splits text at blank-line boundaries, greedily packs paragraphs up to
//! `chunk_size` characters, and seeds each new chunk with the tail of the
//! previous one. All chunks of a parent are buffered before any is emitted,
//! so `chunk_total` is final from the first chunk on.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use super::{IngestSource, ItemStream, Result};
use crate::model::IngestItem;

/// Split at runs of two or more line terminators.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("\n\n") {
        parts.push(&rest[..pos]);
        let after = &rest[pos..];
        let run = after.bytes().take_while(|b| *b == b'\n').count();
        rest = &after[run..];
    }
    if parts.is_empty() || !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

/// Last `n` characters of `s`.
fn char_tail(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}

/// Chunk `text` into pieces of at most roughly `chunk_size` characters,
/// overlapping by `overlap`. `chunk_size == 0` disables chunking.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![text.to_string()];
    }

    let normalized = text.replace("\r\n", "\n");
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for para in split_paragraphs(&normalized) {
        let mut piece = para.to_string();
        if !piece.ends_with('\n') {
            piece.push('\n');
        }
        let piece_len = piece.chars().count();

        if buf_len + piece_len > chunk_size && !buf.is_empty() {
            let chunk = buf.trim().to_string();
            let tail = char_tail(&chunk, overlap);
            chunks.push(chunk);
            buf = tail;
            buf_len = buf.chars().count();
        }
        buf.push_str(&piece);
        buf_len += piece_len;
    }

    let last = buf.trim();
    if !last.is_empty() || chunks.is_empty() {
        chunks.push(last.to_string());
    }
    chunks
}

/// Derive the chunk items of a parent item. With `chunk_size == 0` the
/// parent is returned unchanged.
pub fn chunk_item(item: &IngestItem, chunk_size: usize, overlap: usize) -> Vec<IngestItem> {
    if chunk_size == 0 {
        return vec![item.clone()];
    }
    let chunks = chunk_text(&item.text, chunk_size, overlap);
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let mut metadata = item.metadata.clone();
            metadata.insert("parent_id".into(), Value::from(item.doc_id.clone()));
            metadata.insert("chunk_index".into(), Value::from(index));
            metadata.insert("chunk_total".into(), Value::from(total));
            IngestItem::new(format!("{}#c{index}", item.doc_id), text, metadata)
        })
        .collect()
}

/// Wraps a source and emits chunks instead of whole items.
pub struct ChunkingSource {
    inner: Arc<dyn IngestSource>,
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingSource {
    pub fn new(inner: Arc<dyn IngestSource>, chunk_size: usize, overlap: usize) -> Self {
        Self {
            inner,
            chunk_size,
            overlap,
        }
    }
}

#[async_trait]
impl IngestSource for ChunkingSource {
    fn describe(&self) -> String {
        format!(
            "chunked(size={}, overlap={}, {})",
            self.chunk_size,
            self.overlap,
            self.inner.describe()
        )
    }

    async fn stream(&self) -> Result<ItemStream> {
        let inner = self.inner.stream().await?;
        let (chunk_size, overlap) = (self.chunk_size, self.overlap);
        let stream = inner.flat_map(move |result| {
            let expanded: Vec<Result<IngestItem>> = match result {
                Ok(item) => chunk_item(&item, chunk_size, overlap)
                    .into_iter()
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(expanded)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, sha256_hex};

    fn long_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("paragraph number {i} with a little bit of filler text"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn zero_chunk_size_is_identity() {
        let text = long_text(5);
        assert_eq!(chunk_text(&text, 0, 100), vec![text.clone()]);

        let item = IngestItem::new("doc", text, Metadata::new());
        let out = chunk_item(&item, 0, 100);
        assert_eq!(out, vec![item]);
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunk_text("just one short paragraph", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "just one short paragraph");
    }

    #[test]
    fn long_text_splits_at_paragraph_boundaries() {
        let text = long_text(20);
        let chunks = chunk_text(&text, 200, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = long_text(20);
        let overlap = 40;
        let chunks = chunk_text(&text, 200, overlap);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail = char_tail(&pair[0], overlap);
            assert!(
                pair[1].starts_with(tail.trim_start()),
                "chunk does not continue from the previous tail"
            );
        }
    }

    #[test]
    fn crlf_is_normalized() {
        let chunks = chunk_text("one\r\n\r\ntwo", 1000, 0);
        assert_eq!(chunks, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn chunk_items_carry_lineage_and_own_checksums() {
        let mut metadata = Metadata::new();
        metadata.insert("repo".into(), Value::from("r1"));
        let parent = IngestItem::new("https://host/o/r@big.md", long_text(20), metadata);

        let chunks = chunk_item(&parent, 200, 50);
        let total = chunks.len();
        assert!(total > 1);

        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.doc_id, format!("{}#c{index}", parent.doc_id));
            assert_eq!(chunk.meta_str("parent_id"), Some(parent.doc_id.as_str()));
            assert_eq!(
                chunk.metadata.get("chunk_index").and_then(Value::as_u64),
                Some(index as u64)
            );
            assert_eq!(
                chunk.metadata.get("chunk_total").and_then(Value::as_u64),
                Some(total as u64)
            );
            assert_eq!(chunk.meta_str("repo"), Some("r1"));
            assert_eq!(chunk.checksum, sha256_hex(&chunk.text));
        }
    }
}
