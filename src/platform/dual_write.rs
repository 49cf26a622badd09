use chrono::{DateTime, Utc};
use log::warn;
use std::sync::Arc;
use std::time::Duration;

use crate::platform::cache::{
    latest_release_key, logs_key, CacheResult, RecentLogCache, DEPLOYS_BY_APP_KEY,
    TOTAL_DEPLOYS_KEY,
};
use crate::platform::db::CacheConfig;
use crate::platform::error::PlatformError;
use crate::platform::store::{DurableStore, LogEntry, Release};

/// Writes that land in both the durable store and the recent-log cache.
///
/// Phase one is the durable write and its failure fails the operation. Phase
/// two refreshes the cache, a derived view that can be rebuilt from the store,
/// so its failures are logged and absorbed.
pub struct DualWriter {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn RecentLogCache>,
    recent_log_limit: usize,
    recent_log_ttl: Duration,
}

impl DualWriter {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn RecentLogCache>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            recent_log_limit: config.recent_log_limit.max(1),
            recent_log_ttl: Duration::from_secs(config.recent_log_ttl_secs),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn RecentLogCache> {
        &self.cache
    }

    pub fn recent_log_limit(&self) -> usize {
        self.recent_log_limit
    }

    pub async fn append_log(&self, entry: &LogEntry) -> Result<(), PlatformError> {
        self.store.append_log(entry).await?;

        if let Err(e) = self.cache_log(entry).await {
            warn!(
                "Recent-log cache update failed for application {}: {e}",
                entry.application_id
            );
        }
        Ok(())
    }

    /// Push, trim and expire are attempted independently so that a failed push
    /// never leaves the list without its bound or its expiry refreshed.
    async fn cache_log(&self, entry: &LogEntry) -> CacheResult<()> {
        let key = logs_key(&entry.application_id);
        let payload = serde_json::to_string(entry)?;

        let pushed = self.cache.push_front(&key, payload).await.map(|_| ());
        let trimmed = self
            .cache
            .trim(&key, 0, self.recent_log_limit - 1)
            .await;
        let expired = self
            .cache
            .expire(&key, self.recent_log_ttl)
            .await
            .map(|_| ());

        pushed.and(trimmed).and(expired)
    }

    /// Recent entries from the bounded list, oldest first. Empty when cold.
    pub async fn cached_logs(&self, app_id: &str) -> CacheResult<Vec<LogEntry>> {
        let raw = self.cache.list(&logs_key(app_id)).await?;
        let mut entries = raw
            .iter()
            .map(|payload| serde_json::from_str::<LogEntry>(payload))
            .collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }

    pub async fn mirror_release(&self, release: &Release) {
        let result = async {
            let payload = serde_json::to_string(release)?;
            self.cache
                .set(&latest_release_key(&release.app_id), payload)
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(
                "Failed to mirror release v{} of application {}: {e}",
                release.version, release.app_id
            );
        }
    }

    pub async fn cached_latest_release(&self, app_id: &str) -> CacheResult<Option<Release>> {
        match self.cache.get(&latest_release_key(app_id)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn record_deployment(&self, app_id: &str, at: DateTime<Utc>) {
        if let Err(e) = self.cache.incr(TOTAL_DEPLOYS_KEY).await {
            warn!("Failed to count deployment of application {app_id}: {e}");
        }
        if let Err(e) = self
            .cache
            .sorted_insert(DEPLOYS_BY_APP_KEY, at.timestamp_millis() as f64, app_id)
            .await
        {
            warn!("Failed to record deployment time of application {app_id}: {e}");
        }
    }

    /// Drop every cache key derived from an application that no longer exists
    pub async fn purge_application(&self, app_id: &str) {
        for key in [logs_key(app_id), latest_release_key(app_id)] {
            if let Err(e) = self.cache.delete(&key).await {
                warn!("Failed to drop cache key {key}: {e}");
            }
        }
    }
}
