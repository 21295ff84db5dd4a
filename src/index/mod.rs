//! Incremental indexer.
//!
//! Diffs a stream of items against the checksum store, embeds what changed,
//! writes vector rows, and only then refreshes checksums. The ordering is
//! load-bearing: a crash between the two writes leaves vectors present and
//! checksums stale, so the next run re-indexes the same items harmlessly;
//! the opposite order would silently lose data.

use std::sync::Arc;

use futures::TryStreamExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::checksum::{ChecksumError, ChecksumRecord, ChecksumStore};
use crate::embed::{EmbedError, EmbeddingClient};
use crate::model::IngestItem;
use crate::progress::{Canceled, ProgressSink, Stage};
use crate::sources::{ItemStream, SourceError};
use crate::vector::{VectorError, VectorRow, VectorStore};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("job canceled")]
    Canceled,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

impl From<Canceled> for IndexError {
    fn from(_: Canceled) -> Self {
        IndexError::Canceled
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
    /// Items seen on the stream.
    pub scanned: u64,
    /// Items written (vector rows for ingest, checksum records for refresh).
    pub written: u64,
}

pub struct Indexer {
    checksums: ChecksumStore,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingClient>,
    embed_batch: usize,
}

impl Indexer {
    pub fn new(
        checksums: ChecksumStore,
        vectors: VectorStore,
        embedder: Arc<dyn EmbeddingClient>,
        embed_batch: usize,
    ) -> Self {
        Self {
            checksums,
            vectors,
            embedder,
            embed_batch: embed_batch.max(1),
        }
    }

    /// Index a stream of items, skipping unchanged ones unless `force`.
    pub async fn index_items(
        &self,
        mut items: ItemStream,
        force: bool,
        sink: &dyn ProgressSink,
    ) -> Result<IndexOutcome> {
        sink.update(Stage::Scanning, Some(0), None, Some("scanning items"))?;
        let existing = self.checksums.load_map()?;
        debug!(entries = existing.len(), "Checksum map loaded");

        let mut to_index: Vec<IngestItem> = Vec::new();
        let mut scanned = 0u64;
        while let Some(item) = items.try_next().await? {
            scanned += 1;
            if item.text.is_empty() {
                continue;
            }
            if !force && existing.get(&item.doc_id) == Some(&item.checksum) {
                continue;
            }
            to_index.push(item);
        }

        if to_index.is_empty() {
            info!(scanned, "No changes detected, skipping indexing");
            sink.update(Stage::Filtered, Some(0), Some(scanned), Some("no changes"))?;
            sink.update(Stage::Done, Some(0), Some(scanned), Some("no changes"))?;
            return Ok(IndexOutcome { scanned, written: 0 });
        }

        let total = to_index.len() as u64;
        sink.update(
            Stage::Filtered,
            Some(total),
            Some(scanned),
            Some("changed/new items"),
        )?;
        sink.update(
            Stage::Indexing,
            Some(0),
            Some(total),
            Some("writing to vector store"),
        )?;

        let mut records: Vec<ChecksumRecord> = Vec::with_capacity(to_index.len());
        let mut done = 0u64;
        for batch in to_index.chunks(self.embed_batch) {
            let texts: Vec<String> = batch.iter().map(|item| item.text.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            let rows: Vec<VectorRow> = batch
                .iter()
                .zip(embeddings)
                .map(|(item, embedding)| {
                    let mut metadata = item.metadata.clone();
                    metadata.insert("checksum".into(), Value::from(item.checksum.clone()));
                    VectorRow {
                        node_id: item.doc_id.clone(),
                        text: item.text.clone(),
                        metadata,
                        embedding,
                    }
                })
                .collect();
            self.vectors.upsert_many(&rows)?;
            records.extend(
                batch
                    .iter()
                    .map(|item| ChecksumRecord::new(&item.doc_id, &item.checksum)),
            );
            done += batch.len() as u64;
            sink.update(Stage::Indexing, Some(done), Some(total), None)?;
        }

        // All vector upserts have landed; only now refresh checksums.
        self.checksums.upsert_many(&records)?;

        info!(indexed = total, scanned, "Indexing pass complete");
        sink.update(Stage::Indexed, Some(total), Some(total), Some("completed"))?;
        sink.update(Stage::Done, Some(total), Some(total), Some("completed"))?;
        Ok(IndexOutcome {
            scanned,
            written: total,
        })
    }

    /// Refresh checksum records without touching vectors.
    ///
    /// Brings the checksum map in sync after an out-of-band reindex, or
    /// baselines a freshly populated store.
    pub async fn update_checksums(
        &self,
        mut items: ItemStream,
        sink: &dyn ProgressSink,
    ) -> Result<IndexOutcome> {
        let mut records = Vec::new();
        while let Some(item) = items.try_next().await? {
            records.push(ChecksumRecord::new(&item.doc_id, &item.checksum));
        }
        let total = records.len() as u64;
        sink.update(Stage::Checksums, Some(0), Some(total), Some("updating"))?;
        self.checksums.upsert_many(&records)?;
        info!(records = total, "Checksum refresh complete");
        sink.update(
            Stage::Done,
            Some(total),
            Some(total),
            Some("checksums updated"),
        )?;
        Ok(IndexOutcome {
            scanned: total,
            written: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedding;
    use crate::model::{IngestItem, Metadata};
    use crate::progress::testing::RecordingSink;
    use futures::StreamExt;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn fixture() -> (Indexer, VectorStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let checksums = ChecksumStore::open(dir.path().join("checksums")).unwrap();
        let vectors = VectorStore::open(dir.path(), "vectors", DIM).unwrap();
        let indexer = Indexer::new(
            checksums,
            vectors.clone(),
            Arc::new(HashEmbedding::new(DIM)),
            2,
        );
        (indexer, vectors, dir)
    }

    fn items(specs: &[(&str, &str)]) -> ItemStream {
        let owned: Vec<IngestItem> = specs
            .iter()
            .map(|(id, text)| IngestItem::new(*id, *text, Metadata::new()))
            .collect();
        futures::stream::iter(owned.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn first_pass_writes_vectors_then_checksums() {
        let (indexer, vectors, _dir) = fixture();
        let sink = RecordingSink::new();

        let outcome = indexer
            .index_items(items(&[("a", "alpha"), ("b", "beta")]), false, &sink)
            .await
            .unwrap();

        assert_eq!(outcome, IndexOutcome { scanned: 2, written: 2 });
        assert!(vectors.get("a").unwrap().is_some());
        assert!(vectors.get("b").unwrap().is_some());

        let stages = sink.stages();
        assert_eq!(stages.first(), Some(&Stage::Scanning));
        assert_eq!(stages.last(), Some(&Stage::Done));
        assert!(stages.contains(&Stage::Filtered));
        assert!(stages.contains(&Stage::Indexing));
        assert!(stages.contains(&Stage::Indexed));
    }

    #[tokio::test]
    async fn unchanged_rerun_writes_nothing() {
        let (indexer, _vectors, _dir) = fixture();
        indexer
            .index_items(items(&[("a", "alpha")]), false, &crate::progress::NullSink)
            .await
            .unwrap();

        let sink = RecordingSink::new();
        let outcome = indexer
            .index_items(items(&[("a", "alpha")]), false, &sink)
            .await
            .unwrap();

        assert_eq!(outcome, IndexOutcome { scanned: 1, written: 0 });
        let (stage, done, total, note) = sink.last().unwrap();
        assert_eq!(stage, Stage::Done);
        assert_eq!(done, Some(0));
        assert_eq!(total, Some(1));
        assert_eq!(note.as_deref(), Some("no changes"));
    }

    #[tokio::test]
    async fn force_reindexes_unchanged_items() {
        let (indexer, _vectors, _dir) = fixture();
        indexer
            .index_items(items(&[("a", "alpha")]), false, &crate::progress::NullSink)
            .await
            .unwrap();

        let outcome = indexer
            .index_items(items(&[("a", "alpha")]), true, &crate::progress::NullSink)
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome { scanned: 1, written: 1 });
    }

    #[tokio::test]
    async fn changed_content_is_reindexed() {
        let (indexer, vectors, _dir) = fixture();
        indexer
            .index_items(items(&[("a", "old")]), false, &crate::progress::NullSink)
            .await
            .unwrap();

        let outcome = indexer
            .index_items(items(&[("a", "new")]), false, &crate::progress::NullSink)
            .await
            .unwrap();
        assert_eq!(outcome.written, 1);
        assert_eq!(vectors.get("a").unwrap().unwrap().text, "new");
    }

    #[tokio::test]
    async fn empty_text_items_are_dropped() {
        let (indexer, vectors, _dir) = fixture();
        let outcome = indexer
            .index_items(
                items(&[("a", ""), ("b", "beta")]),
                false,
                &crate::progress::NullSink,
            )
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome { scanned: 2, written: 1 });
        assert!(vectors.get("a").unwrap().is_none());
        assert!(vectors.get("b").unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_stream_completes_without_writes() {
        let (indexer, vectors, _dir) = fixture();
        let sink = RecordingSink::new();
        let outcome = indexer
            .index_items(items(&[]), false, &sink)
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome { scanned: 0, written: 0 });
        assert_eq!(vectors.count().unwrap(), 0);
        let (_, done, total, _) = sink.last().unwrap();
        assert_eq!(done, Some(0));
        assert_eq!(total, Some(0));
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_canceled() {
        let (indexer, _vectors, _dir) = fixture();
        let sink = RecordingSink::canceling_after(1);
        let err = indexer
            .index_items(items(&[("a", "alpha")]), false, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Canceled));
    }

    #[tokio::test]
    async fn checksum_refresh_skips_vectors() {
        let (indexer, vectors, _dir) = fixture();
        let sink = RecordingSink::new();
        let outcome = indexer
            .update_checksums(items(&[("a", "alpha"), ("b", "beta")]), &sink)
            .await
            .unwrap();
        assert_eq!(outcome.written, 2);
        assert_eq!(vectors.count().unwrap(), 0);
        assert_eq!(sink.stages(), vec![Stage::Checksums, Stage::Done]);

        // Subsequent ingest sees the refreshed checksums and skips.
        let second = indexer
            .index_items(
                items(&[("a", "alpha"), ("b", "beta")]),
                false,
                &crate::progress::NullSink,
            )
            .await
            .unwrap();
        assert_eq!(second.written, 0);
    }
}
