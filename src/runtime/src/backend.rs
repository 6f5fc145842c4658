//! ExecutionBackend - the minimal container execution service the shim drives.
//!
//! The backend only knows how to create, start, signal, delete and inspect
//! OS-level containers. It keeps no metadata beyond the container id and its
//! current status, which is why the shim tracks everything else itself.

use std::path::PathBuf;

use async_trait::async_trait;
use ctrshim_core::api::ContainerState;
use ctrshim_core::error::Result;
use serde::{Deserialize, Serialize};

use crate::spec::RuntimeSpec;

/// Container status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Created,
    Running,
    Paused,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl BackendStatus {
    /// Translate to the orchestrator's state model.
    pub fn to_container_state(self) -> ContainerState {
        match self {
            BackendStatus::Created => ContainerState::Created,
            BackendStatus::Running | BackendStatus::Paused => ContainerState::Running,
            BackendStatus::Stopped => ContainerState::Exited,
            BackendStatus::Unknown => ContainerState::Unknown,
        }
    }
}

/// A container known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendContainer {
    pub id: String,
    pub status: BackendStatus,
}

/// Mount the backend performs to present the rootfs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootfsMount {
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: PathBuf,
    pub options: Vec<String>,
}

impl RootfsMount {
    /// Read-write recursive bind of `source`.
    pub fn bind(source: impl Into<PathBuf>) -> Self {
        Self {
            mount_type: "bind".to_string(),
            source: source.into(),
            options: vec!["rw".to_string(), "rbind".to_string()],
        }
    }
}

/// Runtime spec wrapped with its type tag, carried opaquely by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSpec {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl TypedSpec {
    /// Serialize a runtime spec into its wire payload.
    pub fn encode(spec: &RuntimeSpec) -> Result<Self> {
        Ok(Self {
            type_url: spec.oci_version.clone(),
            value: serde_json::to_vec(spec)?,
        })
    }

    /// Decode the payload back into a runtime spec.
    pub fn decode(&self) -> Result<RuntimeSpec> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

/// Backend create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub id: String,
    pub spec: TypedSpec,
    pub rootfs: Vec<RootfsMount>,
    pub runtime: String,
    pub terminal: bool,
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Trait for execution backends.
///
/// `info` returns `Ok(None)` when the backend does not know the id; every
/// other failure is a communication or execution fault.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// All containers the backend currently tracks.
    async fn list(&self) -> Result<Vec<BackendContainer>>;

    /// Create a container from a runtime spec.
    async fn create(&self, request: CreateRequest) -> Result<BackendContainer>;

    /// Start the container's init process.
    async fn start(&self, id: &str) -> Result<()>;

    /// Deliver a signal to the container's init process.
    async fn kill(&self, id: &str, signal: i32) -> Result<()>;

    /// Stop and delete the container.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Inspect a single container.
    async fn info(&self, id: &str) -> Result<Option<BackendContainer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            BackendStatus::Created.to_container_state(),
            ContainerState::Created
        );
        assert_eq!(
            BackendStatus::Running.to_container_state(),
            ContainerState::Running
        );
        assert_eq!(
            BackendStatus::Paused.to_container_state(),
            ContainerState::Running
        );
        assert_eq!(
            BackendStatus::Stopped.to_container_state(),
            ContainerState::Exited
        );
        assert_eq!(
            BackendStatus::Unknown.to_container_state(),
            ContainerState::Unknown
        );
    }

    #[test]
    fn test_unrecognized_status_deserializes_unknown() {
        let c: BackendContainer =
            serde_json::from_str(r#"{"id":"c1","status":"pausing"}"#).unwrap();
        assert_eq!(c.status, BackendStatus::Unknown);
    }

    #[test]
    fn test_typed_spec_roundtrip() {
        let spec = RuntimeSpec::build("c1", vec!["sh".to_string()], "/tmp/rootfs", false);
        let typed = TypedSpec::encode(&spec).unwrap();
        assert_eq!(typed.type_url, spec.oci_version);
        assert_eq!(typed.decode().unwrap(), spec);
    }

    #[test]
    fn test_rootfs_bind() {
        let m = RootfsMount::bind("/var/lib/ctrshim/c1/rootfs");
        assert_eq!(m.mount_type, "bind");
        assert_eq!(m.options, vec!["rw", "rbind"]);
    }
}
