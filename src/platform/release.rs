use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::platform::db::ReleaseConfig;
use crate::platform::dual_write::DualWriter;
use crate::platform::error::PlatformError;
use crate::platform::store::{DurableStore, Release};
use crate::{ACTIVITY_ACTION_RELEASE, ACTIVITY_ACTOR_SYSTEM, RELEASE_STATUS_SUCCEEDED};

/// Assigns per-application release versions.
///
/// Writers inside this process are serialized per application, so the
/// read-max-then-insert pair never races locally. Writers in other processes
/// sharing the same database are caught by the `(app_id, version)` uniqueness
/// constraint and the insert is retried with a fresh read, up to
/// `max_attempts` times.
pub struct ReleaseSequencer {
    writer: Arc<DualWriter>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_attempts: u32,
}

impl ReleaseSequencer {
    pub fn new(writer: Arc<DualWriter>, config: &ReleaseConfig) -> Self {
        Self {
            writer,
            locks: DashMap::new(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    fn store(&self) -> &Arc<dyn DurableStore> {
        self.writer.store()
    }

    fn lock_for(&self, app_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(app_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record a new release and return it. Versions start at 1 and are
    /// never reused for an application.
    pub async fn create_release(
        &self,
        app_id: &str,
        description: &str,
    ) -> Result<Release, PlatformError> {
        let lock = self.lock_for(app_id);
        let _guard = lock.lock().await;

        let mut attempt = 1;
        let release = loop {
            let version = self.store().max_release_version(app_id).await? + 1;
            match self
                .store()
                .insert_release(app_id, version, description, RELEASE_STATUS_SUCCEEDED)
                .await
            {
                Ok(release) => break release,
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    debug!(
                        "Release v{version} of application {app_id} taken concurrently (attempt {attempt}/{}), retrying",
                        self.max_attempts
                    );
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        };

        self.store()
            .append_activity(
                app_id,
                ACTIVITY_ACTOR_SYSTEM,
                ACTIVITY_ACTION_RELEASE,
                description,
            )
            .await?;
        self.writer.mirror_release(&release).await;

        info!(
            "Created release v{} for application {app_id}: {description}",
            release.version
        );
        Ok(release)
    }

    /// The cached projection when present, otherwise the store's highest version
    pub async fn latest_release(&self, app_id: &str) -> Result<Option<Release>, PlatformError> {
        match self.writer.cached_latest_release(app_id).await {
            Ok(Some(release)) => return Ok(Some(release)),
            Ok(None) => {}
            Err(e) => warn!("Latest-release cache read failed for application {app_id}: {e}"),
        }
        self.store().latest_release(app_id).await
    }

    /// Drop the lock entry of an application that no longer exists
    pub fn forget(&self, app_id: &str) {
        self.locks.remove(app_id);
    }
}
