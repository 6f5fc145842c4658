//! ImageBackend - the narrow capability the shim needs from an image tool.
//!
//! Pulling is two-phase: layers are fetched and ingested into a local
//! content store first, then applied into a container rootfs on demand.

use std::path::Path;

use async_trait::async_trait;
use ctrshim_core::api::AuthConfig;
use ctrshim_core::error::{Result, ShimError};
use oci_spec::image::ImageManifest;
use sha2::{Digest, Sha256};

use super::reference::ImageReference;

/// A layer as declared by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
}

/// A resolved manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    /// `sha256:` digest of the raw manifest bytes.
    pub digest: String,
    /// Declared size of config plus layers.
    pub size: u64,
    /// Layers in application order.
    pub layers: Vec<LayerDescriptor>,
}

impl ResolvedManifest {
    /// Parse raw manifest bytes and compute their digest.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let manifest: ImageManifest = serde_json::from_slice(raw)?;
        let layers: Vec<LayerDescriptor> = manifest
            .layers()
            .iter()
            .map(|layer| LayerDescriptor {
                digest: layer.digest().to_string(),
                size: layer.size().max(0) as u64,
                media_type: layer.media_type().to_string(),
            })
            .collect();
        let config_size = manifest.config().size().max(0) as u64;
        let size = config_size + layers.iter().map(|l| l.size).sum::<u64>();

        Ok(Self {
            digest: sha256_digest(raw),
            size,
            layers,
        })
    }
}

/// `sha256:<hex>` of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Trait for image fetch/apply backends.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Fetch the raw manifest bytes for `image`.
    async fn fetch_manifest(
        &self,
        image: &ImageReference,
        auth: Option<&AuthConfig>,
    ) -> Result<Vec<u8>>;

    /// Whether the content store already holds `digest`.
    async fn has_layer(&self, digest: &str) -> Result<bool>;

    /// Fetch a layer from the image's repository and ingest it into the
    /// content store.
    async fn fetch_layer(&self, image: &ImageReference, layer: &LayerDescriptor) -> Result<()>;

    /// Unpack an ingested layer into `dest`.
    async fn apply_layer(&self, digest: &str, dest: &Path) -> Result<()>;
}

/// Map a backend failure into the pull error for `reference`.
pub(crate) fn pull_error(reference: &str, err: ShimError) -> ShimError {
    match err {
        ShimError::ImagePull { .. } => err,
        other => ShimError::ImagePull {
            reference: reference.to_string(),
            message: other.to_string(),
        },
    }
}
