//! Canonical ingest records shared across the pipeline.
//!
//! An [`IngestItem`] is the atomic unit of indexing: a stable document
//! identity, its UTF-8 text, a small metadata map, and the SHA-256 checksum
//! of the text. A [`Manifest`] is an immutable serialized batch of items,
//! referenced by an opaque artifact key.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// String-keyed metadata map. `BTreeMap` keeps serialized output stable.
pub type Metadata = BTreeMap<String, Value>;

/// Lowercase hex SHA-256 over the exact UTF-8 bytes of `text`.
pub fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestItem {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub checksum: String,
}

impl IngestItem {
    /// Build an item, deriving the checksum from `text`.
    ///
    /// Adapters go through this constructor so the checksum invariant holds
    /// for everything they emit.
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        let text = text.into();
        let checksum = sha256_hex(&text);
        Self {
            doc_id: doc_id.into(),
            text,
            metadata,
            checksum,
        }
    }

    /// String value of a metadata key, if present and a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Immutable batch of items. Wire format: `{"count": N, "items": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub count: usize,
    pub items: Vec<IngestItem>,
}

impl Manifest {
    pub fn from_items(items: Vec<IngestItem>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }

    /// Distinct non-empty `metadata.repo` values across all items.
    pub fn repos(&self) -> BTreeSet<String> {
        self.items
            .iter()
            .filter_map(|item| item.meta_str("repo"))
            .filter(|repo| !repo.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// The keep-set used by prune reconciliation.
    pub fn doc_ids(&self) -> HashSet<String> {
        self.items.iter().map(|item| item.doc_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_lowercase_hex_sha256() {
        assert_eq!(
            sha256_hex("hello\n"),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn new_item_derives_checksum() {
        let item = IngestItem::new("doc-1", "hello\n", Metadata::new());
        assert_eq!(item.checksum, sha256_hex("hello\n"));
        assert_eq!(item.checksum.len(), 64);
    }

    #[test]
    fn manifest_wire_format_round_trips() {
        let mut metadata = Metadata::new();
        metadata.insert("repo".into(), Value::from("https://host/org/repo"));
        let manifest = Manifest::from_items(vec![IngestItem::new("a", "x", metadata)]);

        let bytes = serde_json::to_vec(&manifest).unwrap();
        let back: Manifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.count, 1);
    }

    #[test]
    fn manifest_repos_dedupes_and_skips_missing() {
        let mut with_repo = Metadata::new();
        with_repo.insert("repo".into(), Value::from("r1"));
        let manifest = Manifest::from_items(vec![
            IngestItem::new("a", "1", with_repo.clone()),
            IngestItem::new("b", "2", with_repo),
            IngestItem::new("c", "3", Metadata::new()),
        ]);
        let repos = manifest.repos();
        assert_eq!(repos.len(), 1);
        assert!(repos.contains("r1"));
    }
}
