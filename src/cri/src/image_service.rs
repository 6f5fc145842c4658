//! CRI image operations.
//!
//! Maps pull/status/list/remove onto the shared [`ImageResolver`].

use async_trait::async_trait;

use ctrshim_core::api::{AuthConfig, Image, ImageFilter, ImageManager, ImageSpec};
use ctrshim_core::error::{Result, ShimError};
use ctrshim_runtime::oci::{ImageRecord, ImageReference, ImageResolver};

/// Image service backed by an [`ImageResolver`].
pub struct ImageService {
    images: ImageResolver,
}

impl ImageService {
    /// Create a new ImageService.
    pub fn new(images: ImageResolver) -> Self {
        Self { images }
    }
}

/// `repository@digest` for each distinct repository the image was tagged in.
fn repo_digests(record: &ImageRecord) -> Vec<String> {
    let mut digests: Vec<String> = Vec::new();
    for tag in &record.repo_tags {
        let repo = ImageReference::parse(tag)
            .map(|r| r.locator())
            .unwrap_or_else(|_| tag.clone());
        let entry = format!("{}@{}", repo, record.digest);
        if !digests.contains(&entry) {
            digests.push(entry);
        }
    }
    digests
}

fn to_image(record: ImageRecord) -> Image {
    Image {
        repo_digests: repo_digests(&record),
        id: record.digest,
        repo_tags: record.repo_tags,
        size: record.size,
    }
}

#[async_trait]
impl ImageManager for ImageService {
    async fn pull_image(&self, image: &ImageSpec, auth: Option<&AuthConfig>) -> Result<String> {
        if image.image.is_empty() {
            return Err(ShimError::InvalidArgument("image reference is empty".to_string()));
        }
        tracing::info!(image = %image.image, "CRI PullImage");
        self.images.pull(&image.image, auth).await
    }

    async fn image_status(&self, image: &ImageSpec) -> Result<Option<Image>> {
        tracing::debug!(image = %image.image, "CRI ImageStatus");
        Ok(self.images.status(&image.image).await.map(to_image))
    }

    async fn list_images(&self, filter: Option<&ImageFilter>) -> Result<Vec<Image>> {
        if let Some(spec) = filter.and_then(|f| f.image.as_ref()) {
            tracing::debug!(image = %spec.image, "Image list filters are not applied");
        }
        Ok(self.images.list().await.into_iter().map(to_image).collect())
    }

    async fn remove_image(&self, image: &ImageSpec) -> Result<()> {
        tracing::info!(image = %image.image, "CRI RemoveImage");
        self.images.remove(&image.image).await;
        Ok(())
    }
}
