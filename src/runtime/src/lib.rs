//! ctrshim runtime - everything the shim consumes from the host.
//!
//! This crate provides the execution backend client and trait, image
//! fetching through the `dist` tool, the OCI runtime spec builder, stdio
//! conduits and mount helpers.

#![allow(clippy::result_large_err)]

pub mod backend;
pub mod client;
pub mod mount;
pub mod oci;
pub mod spec;
pub mod stdio;

// Re-export common types
pub use backend::{BackendContainer, BackendStatus, CreateRequest, ExecutionBackend, RootfsMount, TypedSpec};
pub use client::ExecutionClient;
pub use oci::{DistBackend, ImageBackend, ImageIndex, ImageRecord, ImageReference, ImageResolver, LayerDescriptor};
pub use spec::{process_args, RuntimeSpec};
pub use stdio::{StdioHandle, StdioPaths};

/// ctrshim runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name passed to the backend on create.
pub const BACKEND_RUNTIME: &str = "linux";
