//! OCI image support.
//!
//! Images are pulled in two phases through an [`ImageBackend`]:
//!
//! ```text
//! pull:        fetch manifest ──► fetch + ingest missing layers ──► index by digest
//! materialize: index lookup ──► apply layers in order into <container>/rootfs
//! ```

mod dist;
mod fetcher;
mod index;
pub mod reference;
mod resolver;

pub use dist::DistBackend;
pub use fetcher::{sha256_digest, ImageBackend, LayerDescriptor, ResolvedManifest};
pub use index::{ImageIndex, ImageRecord};
pub use reference::ImageReference;
pub use resolver::ImageResolver;
