//! Common utilities and types shared across Tessera crates.
//!
//! This module provides the foundational types every backend and the
//! orchestration layer agree on: the error taxonomy, the opaque [`Locator`]
//! addressing stored content, the [`Backend`] enum and the content checksum.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{checksum, Backend, BackendMetadata, Locator};
