//! Hot/cold tiering coordinator.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::tier::{TierEntry, TierState, TieringConfig};
use crate::memory::{MemoryProvider, MemoryStats};
use crate::provider::{check_overwrite, Capabilities, Metadata, StorageProvider, Version, WriteOptions};
use tessera_common::{Backend, Error, Locator, Result};

/// Monitoring snapshot of the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HybridStats {
    /// Hot tier usage.
    pub hot: MemoryStats,
    /// Locators tracked by the coordinator.
    pub tracked: usize,
    pub hot_entries: usize,
    pub cold_entries: usize,
    pub promotions: u64,
    pub demotions: u64,
    pub backups: u64,
}

/// Outcome of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries eligible for demotion.
    pub candidates: usize,
    pub demoted: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    promotions: AtomicU64,
    demotions: AtomicU64,
    backups: AtomicU64,
}

/// Storage provider composing a memory hot tier, a cold tier and an
/// optional backup tier.
///
/// Tier moves are two separate steps, copy then remove, so the content is
/// always readable from at least one tier. Hot tier mutations happen under
/// the entry lock; cold and backup I/O never does.
pub struct HybridCoordinator {
    hot: MemoryProvider,
    cold: Arc<dyn StorageProvider>,
    backup: Option<Arc<dyn StorageProvider>>,
    config: TieringConfig,
    entries: Mutex<HashMap<Locator, TierEntry>>,
    counters: Counters,
}

impl HybridCoordinator {
    pub fn new(
        hot: MemoryProvider,
        cold: Arc<dyn StorageProvider>,
        backup: Option<Arc<dyn StorageProvider>>,
        config: TieringConfig,
    ) -> Self {
        Self {
            hot,
            cold,
            backup,
            config,
            entries: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &TieringConfig {
        &self.config
    }

    /// The hot tier.
    pub fn hot(&self) -> &MemoryProvider {
        &self.hot
    }

    /// Backend kind of the cold tier.
    pub fn cold_backend(&self) -> Backend {
        self.cold.backend()
    }

    /// Current tier of a locator, `None` if untracked.
    pub async fn tier_of(&self, locator: &Locator) -> Option<TierState> {
        self.entries.lock().await.get(locator).map(|e| e.state)
    }

    pub async fn stats(&self) -> HybridStats {
        let entries = self.entries.lock().await;
        let count = |state: TierState| entries.values().filter(|e| e.state == state).count();

        HybridStats {
            hot: self.hot.stats(),
            tracked: entries.len(),
            hot_entries: count(TierState::Hot),
            cold_entries: count(TierState::Cold),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            demotions: self.counters.demotions.load(Ordering::Relaxed),
            backups: self.counters.backups.load(Ordering::Relaxed),
        }
    }

    /// Run a maintenance sweep now.
    pub async fn trigger_tiering(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Demote every hot entry whose TTL expired by `now` and which was not
    /// accessed within the recent window.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let candidates: Vec<Locator> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, entry)| entry.is_demotable(now, &self.config))
                .map(|(locator, _)| locator.clone())
                .collect()
        };

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };
        if candidates.is_empty() {
            return report;
        }

        let results: Vec<(Locator, Result<bool>)> = stream::iter(candidates)
            .map(|locator| async move {
                let result = self.demote(&locator).await;
                (locator, result)
            })
            .buffer_unordered(self.config.sweep_concurrency.max(1))
            .collect()
            .await;

        for (locator, result) in results {
            match result {
                Ok(true) => report.demoted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("hybrid: failed to demote {}: {}", locator, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "hybrid: sweep demoted {}/{} entries ({} failed)",
            report.demoted, report.candidates, report.failed
        );
        report
    }

    /// Move a hot entry to the cold tier: write cold, then remove hot.
    ///
    /// Returns `Ok(false)` when the entry was not hot or was rewritten while
    /// the copy was in flight.
    pub async fn demote(&self, locator: &Locator) -> Result<bool> {
        let generation = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(locator) {
                Some(entry) => {
                    if !entry.begin_demotion() {
                        return Ok(false);
                    }
                    entry.generation
                }
                None => return Ok(false),
            }
        };

        let copied = match self.hot.read(locator).await {
            Ok(content) => self.cold.write(locator, content, &WriteOptions::forced()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = copied {
            self.abort(locator).await;
            return Err(e);
        }

        let finished = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(locator) {
                Some(entry) if entry.state == TierState::Demoting && entry.generation == generation => {
                    self.hot.delete(locator).await?;
                    entry.finish_demotion();
                    Some(true)
                }
                Some(_) => Some(false),
                None => None,
            }
        };

        match finished {
            Some(true) => {
                self.counters.demotions.fetch_add(1, Ordering::Relaxed);
                debug!("hybrid: demoted {} to {}", locator, self.cold.name());
                Ok(true)
            }
            Some(false) => Ok(false),
            None => {
                // Deleted while the copy was in flight; the cold copy is orphaned.
                self.cold.delete(locator).await?;
                debug!("hybrid: dropped cold copy of deleted {}", locator);
                Ok(false)
            }
        }
    }

    /// Write the hot copy through to the cold tier so history starts from it.
    async fn flush_hot(&self, locator: &Locator) -> Result<()> {
        match self.hot.read(locator).await {
            Ok(content) => {
                self.cold
                    .write(locator, content, &WriteOptions::forced())
                    .await?;
                Ok(())
            }
            Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Copy cold content into the hot tier and mark the entry hot.
    async fn promote(&self, locator: &Locator, content: Bytes) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(locator) else {
            return Ok(false);
        };
        if !entry.begin_promotion() {
            return Ok(false);
        }

        // Not forced: content written to the hot tier since is newer.
        match self.hot.write(locator, content, &WriteOptions::default()).await {
            Ok(_) | Err(Error::AlreadyExists(_)) => {}
            Err(e) => {
                entry.abort();
                return Err(e);
            }
        }
        entry.finish_promotion(Utc::now());
        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        info!("hybrid: promoted {} to hot tier", locator);
        Ok(true)
    }

    async fn abort(&self, locator: &Locator) {
        if let Some(entry) = self.entries.lock().await.get_mut(locator) {
            entry.abort();
        }
    }

    /// Current content from whichever tier holds it.
    async fn current_content(&self, locator: &Locator) -> Result<Option<Bytes>> {
        match self.hot.read(locator).await {
            Ok(content) => return Ok(Some(content)),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.cold.read(locator).await {
            Ok(content) => Ok(Some(content)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_backup(&self, locator: &Locator, content: Bytes) {
        let Some(backup) = &self.backup else {
            return;
        };
        match backup.write(locator, content, &WriteOptions::forced()).await {
            Ok(_) => {
                self.counters.backups.fetch_add(1, Ordering::Relaxed);
                debug!("hybrid: backed up {}", locator);
            }
            Err(e) => warn!("hybrid: backup of {} failed: {}", locator, e),
        }
    }

    /// Demote least recently accessed entries until the hot tier fits.
    async fn enforce_capacity(&self, keep: &Locator) {
        while self.hot.stats().bytes > self.config.hot_capacity_bytes {
            let victim = {
                let entries = self.entries.lock().await;
                entries
                    .iter()
                    .filter(|(locator, entry)| entry.state == TierState::Hot && *locator != keep)
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(locator, _)| locator.clone())
            };
            let Some(victim) = victim else {
                break;
            };

            match self.demote(&victim).await {
                Ok(true) => debug!("hybrid: evicted {} for capacity", victim),
                Ok(false) => break,
                Err(e) => {
                    warn!("hybrid: capacity eviction of {} failed: {}", victim, e);
                    break;
                }
            }
        }
    }

    fn tag(mut metadata: Metadata, tier: TierState) -> Metadata {
        metadata
            .provider_data
            .insert("tier".to_string(), serde_json::json!(tier));
        metadata
    }
}

#[async_trait]
impl StorageProvider for HybridCoordinator {
    fn name(&self) -> &str {
        "hybrid"
    }

    fn backend(&self) -> Backend {
        Backend::Hybrid
    }

    fn capabilities(&self) -> Capabilities {
        self.cold.capabilities()
    }

    async fn write(
        &self,
        locator: &Locator,
        content: Bytes,
        options: &WriteOptions,
    ) -> Result<Metadata> {
        let existing = if options.force {
            None
        } else {
            self.current_content(locator).await?
        };
        check_overwrite(locator, existing.as_deref(), &content, options)?;

        let now = Utc::now();
        let (metadata, writes) = {
            let mut entries = self.entries.lock().await;
            // Overwrite rules were settled against the logical content above.
            let hot_options = WriteOptions {
                force: true,
                ..options.clone()
            };
            let metadata = self.hot.write(locator, content.clone(), &hot_options).await?;

            let entry = entries
                .entry(locator.clone())
                .or_insert_with(|| TierEntry::hot(now));
            entry.record_write(now);
            (metadata, entry.writes)
        };

        let every = self.config.backup_every_writes;
        if every > 0 && writes % every == 0 {
            self.write_backup(locator, content).await;
        }

        self.enforce_capacity(locator).await;
        Ok(Self::tag(metadata, TierState::Hot))
    }

    async fn read(&self, locator: &Locator) -> Result<Bytes> {
        let now = Utc::now();
        if let Some(entry) = self.entries.lock().await.get_mut(locator) {
            entry.touch(now);
        }

        match self.hot.read(locator).await {
            Ok(content) => return Ok(content),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match self.cold.read(locator).await {
            Ok(content) => {
                let should_promote = {
                    let mut entries = self.entries.lock().await;
                    let entry = entries.entry(locator.clone()).or_insert_with(|| {
                        let mut adopted = TierEntry::cold(now);
                        adopted.touch(now);
                        adopted
                    });
                    entry.should_promote(self.config.promotion_threshold)
                };
                if should_promote {
                    if let Err(e) = self.promote(locator, content.clone()).await {
                        warn!("hybrid: promotion of {} failed: {}", locator, e);
                    }
                }
                return Ok(content);
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match &self.backup {
            Some(backup) => {
                let content = backup.read(locator).await?;
                warn!("hybrid: served {} from backup tier", locator);
                Ok(content)
            }
            None => Err(Error::NotFound(format!("Content not found: {}", locator))),
        }
    }

    async fn delete(&self, locator: &Locator) -> Result<()> {
        {
            let mut entries = self.entries.lock().await;
            entries.remove(locator);
            self.hot.delete(locator).await?;
        }
        self.cold.delete(locator).await?;
        if let Some(backup) = &self.backup {
            backup.delete(locator).await?;
        }
        debug!("hybrid: deleted {} from all tiers", locator);
        Ok(())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool> {
        if self.hot.exists(locator).await? || self.cold.exists(locator).await? {
            return Ok(true);
        }
        match &self.backup {
            Some(backup) => backup.exists(locator).await,
            None => Ok(false),
        }
    }

    async fn create_version(
        &self,
        locator: &Locator,
        content: Bytes,
        message: &str,
        options: &WriteOptions,
    ) -> Result<(Version, Metadata)> {
        if !self.cold.capabilities().versioning {
            return Err(Error::UnsupportedOperation(format!(
                "hybrid cold tier {} does not support create_version (locator {})",
                self.cold.name(),
                locator
            )));
        }

        self.flush_hot(locator).await?;
        let (version, metadata) = self
            .cold
            .create_version(locator, content.clone(), message, options)
            .await?;

        // Keep a hot copy consistent with the new version.
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        if self.hot.exists(locator).await? {
            self.hot.write(locator, content, &WriteOptions::forced()).await?;
            if let Some(entry) = entries.get_mut(locator) {
                entry.record_write(now);
            }
        } else {
            let entry = entries
                .entry(locator.clone())
                .or_insert_with(|| TierEntry::cold(now));
            entry.touch(now);
        }

        Ok((version, Self::tag(metadata, TierState::Cold)))
    }

    async fn list_versions(&self, locator: &Locator) -> Result<Vec<Version>> {
        self.cold.list_versions(locator).await
    }

    async fn read_version(&self, locator: &Locator, version_id: &str) -> Result<Bytes> {
        self.cold.read_version(locator, version_id).await
    }
}
