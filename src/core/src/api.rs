//! Orchestrator-facing request/response types and service traits.
//!
//! These mirror the CRI v1alpha1 runtime and image services closely enough
//! that an outer transport can convert field by field.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity of a container within its sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Container name, unique within the sandbox.
    pub name: String,
    /// Number of times a container with this name was created in the sandbox.
    pub attempt: u32,
}

/// Reference to an image, either a tag reference or a digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub image: String,
}

impl ImageSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

/// A host path mounted into the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub container_path: String,
    pub host_path: String,
    pub readonly: bool,
}

/// Declared configuration of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub metadata: Option<ContainerMetadata>,
    pub image: Option<ImageSpec>,
    /// Entrypoint. Concatenated with `args` to form the process argv.
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub working_dir: String,
    pub mounts: Vec<Mount>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// Log path relative to the sandbox log directory.
    pub log_path: String,
    pub stdin: bool,
    pub tty: bool,
}

impl ContainerConfig {
    /// Declared name, empty when metadata is absent.
    pub fn name(&self) -> &str {
        self.metadata.as_ref().map(|m| m.name.as_str()).unwrap_or("")
    }

    /// Declared image reference, empty when absent.
    pub fn image_ref(&self) -> &str {
        self.image.as_ref().map(|i| i.image.as_str()).unwrap_or("")
    }
}

/// Identity of a pod sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
}

/// Sandbox configuration passed alongside container requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSandboxConfig {
    pub metadata: Option<PodSandboxMetadata>,
    pub hostname: String,
    pub log_directory: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// Registry credentials supplied with a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub auth: String,
    pub server_address: String,
    pub identity_token: String,
    pub registry_token: String,
}

impl AuthConfig {
    /// True when no credential field is set.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
            && self.password.is_empty()
            && self.auth.is_empty()
            && self.identity_token.is_empty()
            && self.registry_token.is_empty()
    }
}

/// Container lifecycle state as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

/// Filter for container listings. Only state equality is supported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFilter {
    pub state: Option<ContainerState>,
}

impl ContainerFilter {
    pub fn state(state: ContainerState) -> Self {
        Self { state: Some(state) }
    }
}

/// Summary entry returned by container listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub pod_sandbox_id: String,
    pub metadata: ContainerMetadata,
    pub image: ImageSpec,
    pub image_ref: String,
    pub state: ContainerState,
    pub created_at: i64,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// Detailed status of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    pub metadata: ContainerMetadata,
    pub state: ContainerState,
    /// Timestamps in nanoseconds since the epoch, 0 when not reached.
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i32,
    pub image: ImageSpec,
    pub image_ref: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub log_path: String,
}

/// Image filter. Accepted but not applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter {
    pub image: Option<ImageSpec>,
}

/// Image metadata keyed by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub size: u64,
}

/// Runtime name and API version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub runtime_name: String,
    pub runtime_version: String,
    pub runtime_api_version: String,
}

/// One readiness condition of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCondition {
    pub r#type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
}

/// Runtime readiness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub conditions: Vec<RuntimeCondition>,
}

/// Container lifecycle operations offered to the orchestrator.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Create a container in the given sandbox and return its id.
    async fn create_container(
        &self,
        pod_sandbox_id: &str,
        config: Option<&ContainerConfig>,
        sandbox_config: Option<&PodSandboxConfig>,
    ) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a container, waiting up to `timeout` seconds before forcing it.
    async fn stop_container(&self, container_id: &str, timeout: i64) -> Result<()>;

    /// Remove a container and its working directory.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Current status of a container.
    async fn container_status(&self, container_id: &str) -> Result<ContainerStatus>;

    /// List containers, optionally filtered.
    async fn list_containers(&self, filter: Option<&ContainerFilter>) -> Result<Vec<Container>>;
}

/// Image operations offered to the orchestrator.
#[async_trait]
pub trait ImageManager: Send + Sync {
    /// Pull an image and return its digest.
    async fn pull_image(&self, image: &ImageSpec, auth: Option<&AuthConfig>) -> Result<String>;

    /// Look up an image by digest or tag. `None` when absent.
    async fn image_status(&self, image: &ImageSpec) -> Result<Option<Image>>;

    /// List images.
    async fn list_images(&self, filter: Option<&ImageFilter>) -> Result<Vec<Image>>;

    /// Remove an image by digest.
    async fn remove_image(&self, image: &ImageSpec) -> Result<()>;
}
