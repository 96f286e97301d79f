// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod digest;
mod id;
mod image_ref;
mod service_name;
mod version_tag;

pub use digest::{ImageDigest, ParseDigestError};
pub use id::{ClusterId, Id, SnapshotId, SpecVersionId};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use service_name::{ServiceName, ServiceNameError};
pub use version_tag::{VersionTag, VersionTagError};
