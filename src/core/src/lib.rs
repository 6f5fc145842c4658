//! ctrshim Core - Foundational Types and Abstractions
//!
//! This crate holds what every other ctrshim crate agrees on: the error
//! taxonomy, the shim configuration, and the orchestrator-facing request and
//! response types together with the service traits that consume them.

pub mod api;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use api::{
    AuthConfig, Container, ContainerConfig, ContainerFilter, ContainerManager, ContainerMetadata,
    ContainerState, ContainerStatus, Image, ImageFilter, ImageManager, ImageSpec, Mount,
    PodSandboxConfig, PodSandboxMetadata, RuntimeCondition, RuntimeStatus, VersionInfo,
};
pub use config::{DistConfig, HostStdio, ShimConfig};
pub use error::{ErrorCode, Result, ShimError};

/// ctrshim version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
