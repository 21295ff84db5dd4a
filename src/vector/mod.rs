//! Vector store gateway.
//!
//! Owns the vector row keyspace: `(node_id, text, metadata, embedding)`
//! records keyed by `node_id`, plus a metadata partition recording the
//! declared embedding dimension. The gateway is the only writer of vector
//! rows; upserts are last-writer-wins per `node_id`.
//!
//! Partition layout:
//! - `rows`: node_id -> StoredRow (JSON)
//! - `meta`: "embed_dim" -> decimal string
//!
//! The dimension is stamped on the first write (lazy table creation) and
//! verified on open: a mismatch is a fatal precondition, the gateway refuses
//! to open and therefore refuses every write.

use std::collections::HashSet;
use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::Metadata;

const META_EMBED_DIM: &str = "embed_dim";

#[derive(Debug, Error)]
pub enum VectorError {
    #[error(
        "embedding dimension mismatch for vector table '{table}': stored={actual} configured={expected}. \
         Fix options: point vector.table_name at a fresh table and re-index, drop the existing \
         table and re-index, or set vector.embed_dim (and the embedding model) to {actual}."
    )]
    DimensionMismatch {
        table: String,
        actual: usize,
        expected: usize,
    },

    #[error("row for '{node_id}' has embedding of length {actual}, expected {expected}")]
    BadRowDimension {
        node_id: String,
        actual: usize,
        expected: usize,
    },

    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("row decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VectorError>;

/// A vector row as written by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRow {
    pub node_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Stored value: the row minus its key.
#[derive(Serialize, Deserialize)]
struct StoredRow {
    text: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct VectorStore {
    keyspace: Keyspace,
    rows: PartitionHandle,
    meta: PartitionHandle,
    table: String,
    embed_dim: usize,
}

impl VectorStore {
    /// Open the gateway for `table` under `root`, verifying the declared
    /// embedding dimension against `embed_dim` when one is recorded.
    pub fn open<P: AsRef<Path>>(root: P, table: &str, embed_dim: usize) -> Result<Self> {
        let path = root.as_ref().join(table);
        let keyspace = Config::new(&path).open()?;
        let rows = keyspace.open_partition("rows", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        if let Some(stored) = meta.get(META_EMBED_DIM)? {
            let actual: usize = String::from_utf8_lossy(&stored).parse().unwrap_or(0);
            if actual != embed_dim {
                return Err(VectorError::DimensionMismatch {
                    table: table.to_string(),
                    actual,
                    expected: embed_dim,
                });
            }
        }

        info!(table, embed_dim, path = %path.display(), "Vector store opened");
        Ok(Self {
            keyspace,
            rows,
            meta,
            table: table.to_string(),
            embed_dim,
        })
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Upsert rows keyed by `node_id` in one atomic batch.
    ///
    /// Stamps the declared dimension on the first write.
    pub fn upsert_many(&self, rows: &[VectorRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for row in rows {
            if row.embedding.len() != self.embed_dim {
                return Err(VectorError::BadRowDimension {
                    node_id: row.node_id.clone(),
                    actual: row.embedding.len(),
                    expected: self.embed_dim,
                });
            }
        }

        let mut batch = self.keyspace.batch();
        if self.meta.get(META_EMBED_DIM)?.is_none() {
            batch.insert(&self.meta, META_EMBED_DIM, self.embed_dim.to_string());
        }
        for row in rows {
            let stored = StoredRow {
                text: row.text.clone(),
                metadata: row.metadata.clone(),
                embedding: row.embedding.clone(),
            };
            batch.insert(&self.rows, row.node_id.as_bytes(), serde_json::to_vec(&stored)?);
        }
        batch.commit()?;
        debug!(table = %self.table, rows = rows.len(), "Vector rows upserted");
        Ok(())
    }

    /// Delete rows by `node_id` in one atomic batch. Missing ids are ignored.
    pub fn delete_many<I, S>(&self, node_ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut batch = self.keyspace.batch();
        let mut deleted = 0;
        for id in node_ids {
            batch.remove(&self.rows, id.as_ref().as_bytes());
            deleted += 1;
        }
        batch.commit()?;
        debug!(table = %self.table, deleted, "Vector rows deleted");
        Ok(deleted)
    }

    pub fn get(&self, node_id: &str) -> Result<Option<VectorRow>> {
        match self.rows.get(node_id.as_bytes())? {
            Some(value) => {
                let stored: StoredRow = serde_json::from_slice(&value)?;
                Ok(Some(VectorRow {
                    node_id: node_id.to_string(),
                    text: stored.text,
                    metadata: stored.metadata,
                    embedding: stored.embedding,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, node_id: &str) -> Result<bool> {
        Ok(self.rows.get(node_id.as_bytes())?.is_some())
    }

    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for entry in self.rows.iter() {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Node ids whose `metadata.repo` is in `repos`. Full scan.
    pub fn node_ids_where_repo_in(&self, repos: &HashSet<String>) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if repos.is_empty() {
            return Ok(out);
        }
        for entry in self.rows.iter() {
            let (key, value) = entry?;
            let stored: StoredRow = serde_json::from_slice(&value)?;
            let matched = stored
                .metadata
                .get("repo")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|repo| repos.contains(repo));
            if matched {
                out.push(String::from_utf8_lossy(&key).into_owned());
            }
        }
        Ok(out)
    }

    /// Node ids beginning with `prefix`. Range scan.
    pub fn node_ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in self.rows.prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            out.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(out)
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
