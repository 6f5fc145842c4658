//! Image resolution and rootfs materialization.
//!
//! Combines an [`ImageBackend`] with the [`ImageIndex`]. The index lock is
//! only taken for the record mutation itself, never across backend calls.

use std::path::Path;
use std::sync::Arc;

use ctrshim_core::api::AuthConfig;
use ctrshim_core::error::{Result, ShimError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::fetcher::{pull_error, ImageBackend, LayerDescriptor, ResolvedManifest};
use super::index::{ImageIndex, ImageRecord};
use super::reference::ImageReference;

/// Default number of layers fetched at once.
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// Pulls images through a backend and tracks them in an index.
#[derive(Clone)]
pub struct ImageResolver {
    backend: Arc<dyn ImageBackend>,
    index: ImageIndex,
    max_concurrent_fetches: usize,
}

impl ImageResolver {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            backend,
            index: ImageIndex::new(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    /// Limit how many layers are fetched concurrently.
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    /// Pull `reference` and return its manifest digest.
    ///
    /// Layers already in the content store are not fetched again, and the
    /// reference is only recorded as a tag once.
    pub async fn pull(&self, reference: &str, auth: Option<&AuthConfig>) -> Result<String> {
        let parsed = ImageReference::parse(reference)?;

        let raw = self
            .backend
            .fetch_manifest(&parsed, auth)
            .await
            .map_err(|e| pull_error(reference, e))?;
        let manifest = ResolvedManifest::parse(&raw).map_err(|e| pull_error(reference, e))?;

        tracing::info!(
            reference = %reference,
            digest = %manifest.digest,
            layers = manifest.layers.len(),
            "Resolved image manifest"
        );

        let mut missing = Vec::new();
        for layer in &manifest.layers {
            let present = self
                .backend
                .has_layer(&layer.digest)
                .await
                .map_err(|e| pull_error(reference, e))?;
            if !present {
                missing.push(layer.clone());
            }
        }
        self.fetch_layers(reference, &parsed, missing).await?;

        let layers = manifest.layers.iter().map(|l| l.digest.clone()).collect();
        self.index
            .register(&manifest.digest, reference, manifest.size, layers)
            .await;

        tracing::info!(reference = %reference, digest = %manifest.digest, "Image pulled");
        Ok(manifest.digest)
    }

    async fn fetch_layers(
        &self,
        reference: &str,
        image: &ImageReference,
        layers: Vec<LayerDescriptor>,
    ) -> Result<()> {
        if layers.is_empty() {
            return Ok(());
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let mut tasks = JoinSet::new();
        for layer in layers {
            let backend = Arc::clone(&self.backend);
            let image = image.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| ShimError::ImagePull {
                        reference: image.to_string(),
                        message: e.to_string(),
                    })?;
                tracing::debug!(digest = %layer.digest, size = layer.size, "Fetching layer");
                backend.fetch_layer(&image, &layer).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(pull_error(reference, e)),
                Err(e) => {
                    return Err(ShimError::ImagePull {
                        reference: reference.to_string(),
                        message: format!("layer fetch task failed: {}", e),
                    })
                }
            }
        }
        Ok(())
    }

    /// Look up by digest, then by exact tag.
    pub async fn status(&self, spec: &str) -> Option<ImageRecord> {
        self.index.get(spec).await
    }

    /// All known images.
    pub async fn list(&self) -> Vec<ImageRecord> {
        self.index.list().await
    }

    /// Remove by exact digest. Unknown keys are ignored.
    pub async fn remove(&self, digest: &str) {
        if self.index.remove(digest).await.is_some() {
            tracing::info!(digest = %digest, "Image removed");
        }
    }

    /// Unpack a pulled image's layers, in order, into `dest`.
    pub async fn materialize_rootfs(&self, image_ref: &str, dest: &Path) -> Result<ImageRecord> {
        let record = self
            .index
            .get(image_ref)
            .await
            .ok_or_else(|| ShimError::ImageNotPulled(image_ref.to_string()))?;

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| ShimError::rootfs(dest, e))?;

        for digest in &record.layers {
            self.backend
                .apply_layer(digest, dest)
                .await
                .map_err(|e| match e {
                    ShimError::Rootfs { .. } => e,
                    other => ShimError::rootfs(dest, other),
                })?;
        }

        tracing::debug!(
            image = %image_ref,
            digest = %record.digest,
            rootfs = %dest.display(),
            "Rootfs materialized"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 10,
            "digest": "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"
        },
        "layers": [
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 100,
                "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
            },
            {
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 200,
                "digest": "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
            }
        ]
    }"#;

    #[derive(Default)]
    struct MockBackend {
        store: Mutex<HashSet<String>>,
        ingests: Mutex<usize>,
        applied: Mutex<Vec<String>>,
        fail_manifest: bool,
    }

    #[async_trait]
    impl ImageBackend for MockBackend {
        async fn fetch_manifest(
            &self,
            _image: &ImageReference,
            _auth: Option<&AuthConfig>,
        ) -> Result<Vec<u8>> {
            if self.fail_manifest {
                return Err(ShimError::backend("fetch", "manifest", "registry down"));
            }
            Ok(MANIFEST.as_bytes().to_vec())
        }

        async fn has_layer(&self, digest: &str) -> Result<bool> {
            Ok(self.store.lock().unwrap().contains(digest))
        }

        async fn fetch_layer(&self, _image: &ImageReference, layer: &LayerDescriptor) -> Result<()> {
            *self.ingests.lock().unwrap() += 1;
            self.store.lock().unwrap().insert(layer.digest.clone());
            Ok(())
        }

        async fn apply_layer(&self, digest: &str, _dest: &Path) -> Result<()> {
            self.applied.lock().unwrap().push(digest.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pull_is_idempotent() {
        let backend = Arc::new(MockBackend::default());
        let resolver = ImageResolver::new(backend.clone());

        let first = resolver.pull("docker.io/library/redis", None).await.unwrap();
        let second = resolver.pull("docker.io/library/redis", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(*backend.ingests.lock().unwrap(), 2);
        assert_eq!(backend.store.lock().unwrap().len(), 2);

        let record = resolver.status(&first).await.unwrap();
        assert_eq!(record.repo_tags, vec!["docker.io/library/redis"]);
        assert_eq!(record.size, 310);
    }

    #[tokio::test]
    async fn test_pull_second_tag_merges() {
        let resolver = ImageResolver::new(Arc::new(MockBackend::default()));
        let digest = resolver.pull("redis", None).await.unwrap();
        resolver.pull("redis:latest", None).await.unwrap();

        let by_digest = resolver.status(&digest).await.unwrap();
        let by_tag = resolver.status("redis:latest").await.unwrap();
        assert_eq!(by_digest, by_tag);
        assert_eq!(by_digest.repo_tags, vec!["redis", "redis:latest"]);
        assert_eq!(resolver.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pull_failure_is_pull_error() {
        let backend = Arc::new(MockBackend {
            fail_manifest: true,
            ..Default::default()
        });
        let resolver = ImageResolver::new(backend);
        let err = resolver.pull("redis", None).await.unwrap_err();
        assert!(matches!(err, ShimError::ImagePull { ref reference, .. } if reference == "redis"));
        assert!(resolver.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_pull_invalid_reference() {
        let resolver = ImageResolver::new(Arc::new(MockBackend::default()));
        let err = resolver.pull("", None).await.unwrap_err();
        assert!(matches!(err, ShimError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_remove_by_tag_is_noop() {
        let resolver = ImageResolver::new(Arc::new(MockBackend::default()));
        let digest = resolver.pull("redis", None).await.unwrap();

        resolver.remove("redis").await;
        assert!(resolver.status(&digest).await.is_some());
        resolver.remove(&digest).await;
        assert!(resolver.status(&digest).await.is_none());
        assert!(resolver.status("redis").await.is_none());
    }

    #[tokio::test]
    async fn test_materialize_requires_pull() {
        let tmp = tempfile::TempDir::new().unwrap();
        let resolver = ImageResolver::new(Arc::new(MockBackend::default()));
        let err = resolver
            .materialize_rootfs("redis", &tmp.path().join("rootfs"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShimError::ImageNotPulled(_)));
    }

    #[tokio::test]
    async fn test_materialize_applies_layers_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::default());
        let resolver = ImageResolver::new(backend.clone());
        let digest = resolver.pull("redis", None).await.unwrap();

        let rootfs = tmp.path().join("c1").join("rootfs");
        let record = resolver.materialize_rootfs("redis", &rootfs).await.unwrap();
        assert_eq!(record.digest, digest);
        assert!(rootfs.is_dir());

        // Re-applying into the same directory is fine.
        resolver.materialize_rootfs(&digest, &rootfs).await.unwrap();

        let applied = backend.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 4);
        assert!(applied[0].starts_with("sha256:aaaa"));
        assert!(applied[1].starts_with("sha256:bbbb"));
    }
}
