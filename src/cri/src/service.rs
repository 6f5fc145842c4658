//! Combined shim service.
//!
//! Owns the container and image services, which share one image index.

use std::sync::Arc;

use ctrshim_core::api::{RuntimeCondition, RuntimeStatus, VersionInfo};
use ctrshim_core::config::ShimConfig;
use ctrshim_core::error::Result;
use ctrshim_runtime::backend::ExecutionBackend;
use ctrshim_runtime::client::ExecutionClient;
use ctrshim_runtime::oci::{DistBackend, ImageBackend, ImageResolver};

use crate::image_service::ImageService;
use crate::runtime_service::RuntimeService;

/// Name reported by `version`.
pub const RUNTIME_NAME: &str = "ctrshim";

/// CRI API version implemented.
pub const RUNTIME_API_VERSION: &str = "v1alpha1";

/// CRI service facade.
pub struct CriService {
    runtime: RuntimeService,
    images: ImageService,
}

impl CriService {
    /// Build the service on explicit backends.
    pub fn new(
        config: &ShimConfig,
        backend: Arc<dyn ExecutionBackend>,
        image_backend: Arc<dyn ImageBackend>,
    ) -> Self {
        let resolver = ImageResolver::new(image_backend)
            .with_max_concurrent_fetches(config.dist.max_concurrent_fetches);
        Self {
            runtime: RuntimeService::new(config, backend, resolver.clone()),
            images: ImageService::new(resolver),
        }
    }

    /// Connect to the backend socket and use `dist` for images.
    pub async fn connect(config: &ShimConfig) -> Result<Self> {
        config.validate()?;
        let client = ExecutionClient::connect(&config.backend_socket, config.dial_timeout()).await?;
        tracing::info!(
            socket = %config.backend_socket.display(),
            root_dir = %config.root_dir.display(),
            "ctrshim service ready"
        );
        Ok(Self::new(
            config,
            Arc::new(client),
            Arc::new(DistBackend::new(&config.dist)),
        ))
    }

    /// Container lifecycle operations.
    pub fn runtime(&self) -> &RuntimeService {
        &self.runtime
    }

    /// Image operations.
    pub fn images(&self) -> &ImageService {
        &self.images
    }

    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            version: "0.1.0".to_string(),
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: crate::VERSION.to_string(),
            runtime_api_version: RUNTIME_API_VERSION.to_string(),
        }
    }

    /// Readiness conditions. Sandbox networking is not managed here, so
    /// network readiness is always reported.
    pub fn status(&self) -> RuntimeStatus {
        let conditions = ["RuntimeReady", "NetworkReady"]
            .iter()
            .map(|t| RuntimeCondition {
                r#type: t.to_string(),
                status: true,
                reason: String::new(),
                message: String::new(),
            })
            .collect();
        RuntimeStatus { conditions }
    }

    /// Accepted and ignored.
    pub fn update_runtime_config(&self, pod_cidr: &str) {
        tracing::debug!(pod_cidr = %pod_cidr, "Ignoring runtime config update");
    }
}
