//! Persistent `doc_id -> checksum` map backed by Fjall.
//!
//! The indexer snapshots this map to decide which items changed since the
//! last run, and refreshes it after vectors are written. Records carry an
//! `updated_at` timestamp; concurrent upserts on the same id converge to
//! last-writer-wins.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("record decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChecksumError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub doc_id: String,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
}

impl ChecksumRecord {
    pub fn new(doc_id: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            checksum: checksum.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Stored value: the record minus its key.
#[derive(Serialize, Deserialize)]
struct StoredChecksum {
    checksum: String,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ChecksumStore {
    keyspace: Keyspace,
    records: PartitionHandle,
}

impl ChecksumStore {
    /// Open or create the store at `path`. Idempotent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path.as_ref()).open()?;
        let records = keyspace.open_partition("checksums", PartitionCreateOptions::default())?;
        info!(path = %path.as_ref().display(), "Checksum store opened");
        Ok(Self { keyspace, records })
    }

    /// Snapshot the full map.
    pub fn load_map(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for entry in self.records.iter() {
            let (key, value) = entry?;
            let doc_id = String::from_utf8_lossy(&key).into_owned();
            let stored: StoredChecksum = serde_json::from_slice(&value)?;
            map.insert(doc_id, stored.checksum);
        }
        debug!(entries = map.len(), "Checksum map loaded");
        Ok(map)
    }

    /// Upsert a batch of records atomically.
    pub fn upsert_many(&self, records: &[ChecksumRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut batch = self.keyspace.batch();
        for record in records {
            let stored = StoredChecksum {
                checksum: record.checksum.clone(),
                updated_at: record.updated_at,
            };
            batch.insert(
                &self.records,
                record.doc_id.as_bytes(),
                serde_json::to_vec(&stored)?,
            );
        }
        batch.commit()?;
        debug!(records = records.len(), "Checksums upserted");
        Ok(())
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<String>> {
        match self.records.get(doc_id.as_bytes())? {
            Some(value) => {
                let stored: StoredChecksum = serde_json::from_slice(&value)?;
                Ok(Some(stored.checksum))
            }
            None => Ok(None),
        }
    }

    /// Flush pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
