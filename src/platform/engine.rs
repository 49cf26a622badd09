use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::platform::apps::AppManager;
use crate::platform::broadcaster::LogBroadcaster;
use crate::platform::cache::RecentLogCache;
use crate::platform::db::{Settings, StreamConfig};
use crate::platform::deployment::DeploymentOrchestrator;
use crate::platform::dual_write::DualWriter;
use crate::platform::observer_registry::ObserverRegistry;
use crate::platform::release::ReleaseSequencer;
use crate::platform::store::DurableStore;

/// The shared state behind both gRPC services
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn DurableStore>,
    pub cache: Arc<dyn RecentLogCache>,

    /// Live log-stream observers. Registered by the stream service, fanned out
    /// to by the broadcaster, emptied at shutdown so open streams end.
    pub observers: Arc<ObserverRegistry>,

    pub writer: Arc<DualWriter>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub releases: Arc<ReleaseSequencer>,
    pub deployments: Arc<DeploymentOrchestrator>,
    pub apps: Arc<AppManager>,
    pub stream_config: StreamConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn RecentLogCache>,
        settings: &Settings,
    ) -> Self {
        let observers = Arc::new(ObserverRegistry::new());
        let writer = Arc::new(DualWriter::new(store.clone(), cache.clone(), &settings.cache));
        let broadcaster = Arc::new(LogBroadcaster::new(observers.clone(), writer.clone()));
        let releases = Arc::new(ReleaseSequencer::new(writer.clone(), &settings.releases));
        let deployments = Arc::new(DeploymentOrchestrator::new(
            writer.clone(),
            broadcaster.clone(),
            releases.clone(),
            settings.deploy.clone(),
        ));
        let apps = Arc::new(AppManager::new(
            writer.clone(),
            releases.clone(),
            settings.addons.clone(),
        ));

        Self {
            store,
            cache,
            observers,
            writer,
            broadcaster,
            releases,
            deployments,
            apps,
            stream_config: settings.stream.clone(),
        }
    }

    /// Shutdown with the default 30 second timeout
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(30).await
    }

    /// Let running deployments finish, then close every observer stream
    pub async fn shutdown_with_timeout(&self, timeout_secs: u64) -> Result<()> {
        log::info!("Shutting down platform engine with {timeout_secs}s timeout...");

        let in_flight = self.deployments.in_flight();
        if in_flight > 0 {
            log::info!("Waiting for {in_flight} in-flight deployments...");
        }
        if !self
            .deployments
            .wait_idle(Duration::from_secs(timeout_secs))
            .await
        {
            log::error!(
                "Engine shutdown timed out after {timeout_secs}s with {} deployments still running",
                self.deployments.in_flight()
            );
        }

        log::info!("Closing {} observer streams...", self.observers.len());
        self.observers.close_all();

        log::info!("Platform engine shutdown complete");
        Ok(())
    }
}
