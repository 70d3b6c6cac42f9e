//! Per-locator tier state machine.
//!
//! ```text
//!            begin_promotion            finish_promotion
//!   Cold ─────────────────▶ Promoting ─────────────────▶ Hot
//!    ▲                          │ abort                   │
//!    │                          ▼                         │ begin_demotion
//!    │                        Cold                        ▼
//!    └──────────────────────────────────────────────── Demoting
//!                  finish_demotion          (abort returns to Hot)
//! ```
//!
//! A write always puts the entry back to `Hot` and bumps its generation, so
//! an in-flight move can tell that the content changed underneath it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a locator's current content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierState {
    /// Content is in the hot tier.
    Hot,
    /// Content is only in the cold tier.
    Cold,
    /// Being copied cold → hot.
    Promoting,
    /// Being copied hot → cold.
    Demoting,
}

/// Tiering policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieringConfig {
    /// Accesses after which a cold entry is promoted on read.
    pub promotion_threshold: u64,
    /// How long an entry stays hot before it may be demoted.
    pub hot_ttl: Duration,
    /// Entries accessed within this window are never demoted by a sweep.
    pub recent_access_window: Duration,
    /// Write through to the backup tier on every Nth write of a locator (0 disables).
    pub backup_every_writes: u64,
    /// Hot tier size above which least recently used entries are demoted.
    pub hot_capacity_bytes: u64,
    /// Interval of the periodic maintenance sweep.
    pub sweep_interval: Duration,
    /// Maximum demotions running at once during a sweep.
    pub sweep_concurrency: usize,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 3,
            hot_ttl: Duration::from_secs(300),
            recent_access_window: Duration::from_secs(60),
            backup_every_writes: 10,
            hot_capacity_bytes: 256 * 1024 * 1024,
            sweep_interval: Duration::from_secs(300),
            sweep_concurrency: 8,
        }
    }
}

/// Tracking record for one locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierEntry {
    pub state: TierState,
    /// Reads and writes since the entry last became cold.
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    /// When the entry last became hot.
    pub hot_since: Option<DateTime<Utc>>,
    /// Total writes through the coordinator.
    pub writes: u64,
    /// Bumped on every write.
    pub generation: u64,
}

impl TierEntry {
    /// Entry created by a write.
    pub fn hot(now: DateTime<Utc>) -> Self {
        Self {
            state: TierState::Hot,
            access_count: 0,
            last_access: now,
            hot_since: Some(now),
            writes: 0,
            generation: 0,
        }
    }

    /// Entry discovered in the cold tier.
    pub fn cold(now: DateTime<Utc>) -> Self {
        Self {
            state: TierState::Cold,
            access_count: 0,
            last_access: now,
            hot_since: None,
            writes: 0,
            generation: 0,
        }
    }

    /// Count a read.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_access = now;
    }

    /// Count a write. Any in-flight move is superseded.
    pub fn record_write(&mut self, now: DateTime<Utc>) {
        self.touch(now);
        self.writes += 1;
        self.generation += 1;
        if self.state != TierState::Hot {
            self.hot_since = Some(now);
        }
        self.state = TierState::Hot;
    }

    /// Whether a read should promote this entry.
    pub fn should_promote(&self, threshold: u64) -> bool {
        self.state == TierState::Cold && self.access_count >= threshold
    }

    /// Whether a sweep at `now` should demote this entry.
    pub fn is_demotable(&self, now: DateTime<Utc>, config: &TieringConfig) -> bool {
        let elapsed = |since: DateTime<Utc>, limit: Duration| {
            (now - since).to_std().map(|age| age >= limit).unwrap_or(false)
        };

        self.state == TierState::Hot
            && self.hot_since.is_some_and(|since| elapsed(since, config.hot_ttl))
            && elapsed(self.last_access, config.recent_access_window)
    }

    /// Cold → Promoting.
    pub fn begin_promotion(&mut self) -> bool {
        self.transition(TierState::Cold, TierState::Promoting)
    }

    /// Promoting → Hot.
    pub fn finish_promotion(&mut self, now: DateTime<Utc>) -> bool {
        let moved = self.transition(TierState::Promoting, TierState::Hot);
        if moved {
            self.hot_since = Some(now);
        }
        moved
    }

    /// Hot → Demoting.
    pub fn begin_demotion(&mut self) -> bool {
        self.transition(TierState::Hot, TierState::Demoting)
    }

    /// Demoting → Cold. Resets the access counter.
    pub fn finish_demotion(&mut self) -> bool {
        let moved = self.transition(TierState::Demoting, TierState::Cold);
        if moved {
            self.access_count = 0;
            self.hot_since = None;
        }
        moved
    }

    /// Undo an in-flight move: Promoting → Cold, Demoting → Hot.
    pub fn abort(&mut self) {
        self.state = match self.state {
            TierState::Promoting => TierState::Cold,
            TierState::Demoting => TierState::Hot,
            other => other,
        };
    }

    fn transition(&mut self, from: TierState, to: TierState) -> bool {
        if self.state == from {
            self.state = to;
            true
        } else {
            false
        }
    }
}
