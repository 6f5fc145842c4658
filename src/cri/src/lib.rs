//! ctrshim CRI - container and image lifecycle for an orchestrator.
//!
//! Translates CRI requests into calls on a minimal execution backend:
//! - Container id ↔ name, sandbox and attempt via [`naming`]
//! - Container config → OCI runtime spec + rootfs materialized from a pulled image
//! - Container state → always read back from the backend

pub mod container;
pub mod image_service;
pub mod naming;
pub mod runtime_service;
pub mod service;

pub use container::{ContainerRecord, ContainerStore};
pub use image_service::ImageService;
pub use runtime_service::RuntimeService;
pub use service::CriService;

/// ctrshim CRI version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
