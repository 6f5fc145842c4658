//! Container metadata store.
//!
//! The store is the record of configuration and locally observed
//! timestamps. It never stores a container's state: the backend owns that,
//! and callers pass the reconciled state in when building responses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ctrshim_core::api::{
    Container, ContainerConfig, ContainerMetadata, ContainerState, ContainerStatus, ImageSpec,
};
use ctrshim_core::error::{Result, ShimError};
use ctrshim_runtime::stdio::StdioHandle;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What the shim knows about one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    /// Backend container id.
    pub id: String,
    /// Parent sandbox identifier.
    pub pod_sandbox_id: String,
    /// Name and attempt decoded from the id.
    pub metadata: ContainerMetadata,
    /// Configuration the container was created with.
    pub config: ContainerConfig,
    /// Digest of the image backing the rootfs.
    pub image_ref: String,
    /// Resolved log path (sandbox log directory joined with the container's).
    pub log_path: String,
    /// Working directory holding the rootfs and stdio conduits.
    pub dir: PathBuf,
    /// Creation timestamp in nanoseconds.
    pub created_at: i64,
    /// Start timestamp in nanoseconds (0 if not started).
    pub started_at: i64,
    /// Finish timestamp in nanoseconds (0 if not finished).
    pub finished_at: i64,
}

impl ContainerRecord {
    /// Rootfs directory inside the container's working directory.
    pub fn rootfs(&self) -> PathBuf {
        self.dir.join("rootfs")
    }

    fn image(&self) -> ImageSpec {
        self.config.image.clone().unwrap_or_default()
    }

    /// Listing entry for this record in `state`.
    pub fn to_container(&self, state: ContainerState) -> Container {
        Container {
            id: self.id.clone(),
            pod_sandbox_id: self.pod_sandbox_id.clone(),
            metadata: self.metadata.clone(),
            image: self.image(),
            image_ref: self.image_ref.clone(),
            state,
            created_at: self.created_at,
            labels: self.config.labels.clone(),
            annotations: self.config.annotations.clone(),
        }
    }

    /// Detailed status for this record in `state`.
    pub fn to_status(&self, state: ContainerState) -> ContainerStatus {
        ContainerStatus {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit_code: 0,
            image: self.image(),
            image_ref: self.image_ref.clone(),
            labels: self.config.labels.clone(),
            annotations: self.config.annotations.clone(),
            mounts: self.config.mounts.clone(),
            log_path: self.log_path.clone(),
        }
    }
}

/// A record plus the stdio tasks it owns.
#[derive(Debug)]
pub struct ContainerEntry {
    pub record: ContainerRecord,
    pub stdio: Option<StdioHandle>,
}

type Entries = HashMap<String, ContainerEntry>;

/// In-memory store for containers.
///
/// One lock guards the whole map. Callers must not hold it across backend
/// calls; every method here takes and releases it internally.
#[derive(Debug, Clone, Default)]
pub struct ContainerStore {
    containers: Arc<RwLock<Entries>>,
}

impl ContainerStore {
    /// Create a new empty container store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.containers.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.containers.write().await
    }

    /// Add a container. Fails if the id is already tracked, handing the
    /// stdio tasks back so the caller can shut them down.
    pub async fn insert(
        &self,
        record: ContainerRecord,
        stdio: Option<StdioHandle>,
    ) -> std::result::Result<(), (ShimError, Option<StdioHandle>)> {
        let mut store = self.write().await;
        if store.contains_key(&record.id) {
            return Err((ShimError::AlreadyExists(record.id), stdio));
        }
        store.insert(record.id.clone(), ContainerEntry { record, stdio });
        Ok(())
    }

    /// Whether `id` is tracked.
    pub async fn contains(&self, id: &str) -> bool {
        self.read().await.contains_key(id)
    }

    /// Get a container by ID.
    pub async fn get(&self, id: &str) -> Option<ContainerRecord> {
        self.read().await.get(id).map(|e| e.record.clone())
    }

    /// Get a container by ID or fail with `NotFound`.
    pub async fn require(&self, id: &str) -> Result<ContainerRecord> {
        self.get(id)
            .await
            .ok_or_else(|| ShimError::NotFound(format!("container {}", id)))
    }

    /// Snapshot of every record.
    pub async fn list(&self) -> Vec<ContainerRecord> {
        self.read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Record a start timestamp.
    pub async fn mark_started(&self, id: &str, started_at: i64) -> bool {
        match self.write().await.get_mut(id) {
            Some(e) => {
                e.record.started_at = started_at;
                true
            }
            None => false,
        }
    }

    /// Record a finish timestamp.
    pub async fn mark_finished(&self, id: &str, finished_at: i64) -> bool {
        match self.write().await.get_mut(id) {
            Some(e) => {
                e.record.finished_at = finished_at;
                true
            }
            None => false,
        }
    }

    /// Detach the stdio tasks of `id`, leaving the record in place.
    pub async fn take_stdio(&self, id: &str) -> Option<StdioHandle> {
        self.write().await.get_mut(id).and_then(|e| e.stdio.take())
    }

    /// Remove a container by ID.
    pub async fn remove(&self, id: &str) -> Option<ContainerEntry> {
        self.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.read().await.is_empty()
    }
}
