//! Version-controlled storage backend.
//!
//! Content history is kept per locator in a small repository whose
//! reference files are byte-compatible with git. See [`refs`] for the
//! reference format and [`objects`] for object addressing.

pub mod objects;
pub mod provider;
pub mod refs;

pub use objects::{hash_object, Commit, LooseObjects, ObjectKind};
pub use provider::VersionedProvider;
pub use refs::{HeadState, ObjectId, RefManager};
