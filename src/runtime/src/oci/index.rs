//! In-memory image index keyed by manifest digest.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Metadata for a pulled image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Manifest digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// References this image was pulled as, in first-seen order
    pub repo_tags: Vec<String>,
    /// Declared size of config plus layers
    pub size: u64,
    /// Layer digests in application order
    pub layers: Vec<String>,
}

/// Image index. Digest is the key; tags are secondary lookups.
#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    records: Arc<RwLock<HashMap<String, ImageRecord>>>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record or merge `tag` into the existing one.
    ///
    /// Tags are only appended when not already present. A tag names one
    /// image at a time, so it is dropped from any other record.
    pub async fn register(&self, digest: &str, tag: &str, size: u64, layers: Vec<String>) {
        let mut records = self.records.write().await;
        if !tag.is_empty() {
            for record in records.values_mut().filter(|r| r.digest != digest) {
                record.repo_tags.retain(|t| t != tag);
            }
        }
        let record = records
            .entry(digest.to_string())
            .or_insert_with(|| ImageRecord {
                digest: digest.to_string(),
                repo_tags: Vec::new(),
                size,
                layers,
            });
        if !tag.is_empty() && !record.repo_tags.iter().any(|t| t == tag) {
            record.repo_tags.push(tag.to_string());
        }
    }

    /// Look up by digest first, then by tag.
    pub async fn get(&self, spec: &str) -> Option<ImageRecord> {
        let records = self.records.read().await;
        if let Some(record) = records.get(spec) {
            return Some(record.clone());
        }
        records
            .values()
            .find(|r| r.repo_tags.iter().any(|t| t == spec))
            .cloned()
    }

    /// Snapshot of all records.
    pub async fn list(&self) -> Vec<ImageRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Remove by exact digest. Returns the removed record, if any.
    pub async fn remove(&self, digest: &str) -> Option<ImageRecord> {
        self.records.write().await.remove(digest)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
