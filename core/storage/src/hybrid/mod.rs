//! Hybrid hot/cold tiering backend.
//!
//! Layout mirrors the tiers it composes:
//! - [`tier`]: the per-locator state machine and policy
//! - [`coordinator`]: the provider moving content between tiers

pub mod coordinator;
pub mod tier;

pub use coordinator::{HybridCoordinator, HybridStats, SweepReport};
pub use tier::{TierEntry, TierState, TieringConfig};
