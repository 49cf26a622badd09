use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::platform::broadcaster::LogBroadcaster;
use crate::platform::cache::{DEPLOYS_BY_APP_KEY, TOTAL_DEPLOYS_KEY};
use crate::platform::db::DeployConfig;
use crate::platform::dual_write::DualWriter;
use crate::platform::error::{CacheError, PlatformError};
use crate::platform::release::ReleaseSequencer;
use crate::platform::store::{AppStatus, DurableStore, Release};
use crate::{LOG_SOURCE_BUILD, RECENT_DEPLOYS_LIMIT};

pub const DEPLOY_STATUS_STARTED: &str = "started";

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The simulated build output, in emission order. `preview_version` is only
/// what the operator sees; the real version is assigned after the last line.
pub fn build_script(app_id: &str, preview_version: i64, public_url_base: &str) -> Vec<String> {
    let base = public_url_base.trim_end_matches('/');
    vec![
        "-----> Building source...".to_string(),
        "-----> Cloning repository...".to_string(),
        "-----> Detected environment: Node.js".to_string(),
        "-----> Installing dependencies...".to_string(),
        "       Running: npm install".to_string(),
        "       Added 452 packages in 4s".to_string(),
        "-----> Building assets...".to_string(),
        "       Running: npm run build".to_string(),
        "       Build successful (1.2s)".to_string(),
        "-----> Discovering process types".to_string(),
        "       Procfile declares types: web".to_string(),
        "-----> Compressing...".to_string(),
        "       Done: 42.5MB".to_string(),
        "-----> Launching...".to_string(),
        format!("       Released v{preview_version}"),
        format!("-----> App is live at {base}/{app_id}"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStats {
    pub total_deploys: i64,
    /// Newest first
    pub recent_deploys: Vec<String>,
}

/// A deployment that has been acknowledged.
///
/// The continuation does not emit anything until the handle lets it go,
/// through `start`, `wait` or drop. Callers build their acknowledgement first.
pub struct DeploymentHandle {
    pub app_id: String,
    pub branch: String,
    start: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<Release, PlatformError>>,
}

impl DeploymentHandle {
    /// Let the continuation run. Idempotent.
    pub fn start(&mut self) {
        if let Some(start) = self.start.take() {
            let _ = start.send(());
        }
    }

    /// Start the continuation if needed, then wait for the release it created
    pub async fn wait(mut self) -> Result<Release, PlatformError> {
        self.start();
        (&mut self.task)
            .await
            .map_err(|e| PlatformError::Unavailable(format!("deployment task failed: {e}")))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Holds an application's in-flight slot; released on drop so a panicking
/// continuation still frees it
struct InFlightGuard {
    in_flight: Arc<DashMap<String, DateTime<Utc>>>,
    app_id: String,
}

impl InFlightGuard {
    fn acquire(
        in_flight: &Arc<DashMap<String, DateTime<Utc>>>,
        app_id: &str,
    ) -> Result<Self, PlatformError> {
        match in_flight.entry(app_id.to_string()) {
            Entry::Occupied(_) => Err(PlatformError::Conflict(format!(
                "a deployment of application {app_id} is already in progress"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(Self {
                    in_flight: in_flight.clone(),
                    app_id: app_id.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.app_id);
    }
}

/// Drives the `deploying -> running` transition of applications.
pub struct DeploymentOrchestrator {
    writer: Arc<DualWriter>,
    broadcaster: Arc<LogBroadcaster>,
    releases: Arc<ReleaseSequencer>,
    config: DeployConfig,
    in_flight: Arc<DashMap<String, DateTime<Utc>>>,
}

impl DeploymentOrchestrator {
    pub fn new(
        writer: Arc<DualWriter>,
        broadcaster: Arc<LogBroadcaster>,
        releases: Arc<ReleaseSequencer>,
        config: DeployConfig,
    ) -> Self {
        Self {
            writer,
            broadcaster,
            releases,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    fn store(&self) -> &Arc<dyn DurableStore> {
        self.writer.store()
    }

    /// Mark the application `deploying` and start the build in the background.
    ///
    /// Returns as soon as the status is written. No build line is broadcast
    /// before the returned handle is started or dropped, on any runtime
    /// flavor. Rejects a second deployment of the same application while one
    /// is running.
    pub async fn deploy(
        self: &Arc<Self>,
        app_id: &str,
        branch: Option<&str>,
    ) -> Result<DeploymentHandle, PlatformError> {
        let guard = InFlightGuard::acquire(&self.in_flight, app_id)?;
        self.store().set_status(app_id, AppStatus::Deploying).await?;

        let branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(self.config.default_branch.as_str())
            .to_string();
        info!("Deployment of application {app_id} ({branch}) started");

        let (start, started) = oneshot::channel();
        let this = Arc::clone(self);
        let task_app_id = app_id.to_string();
        let task_branch = branch.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            // A dropped handle releases the gate as well
            let _ = started.await;
            let result = this.run(&task_app_id, &task_branch).await;
            match &result {
                Ok(release) => info!(
                    "Deployment of application {task_app_id} finished as release v{}",
                    release.version
                ),
                Err(e) => error!(
                    "Deployment of application {task_app_id} failed, left in deploying: {e}"
                ),
            }
            result
        });

        Ok(DeploymentHandle {
            app_id: app_id.to_string(),
            branch,
            start: Some(start),
            task,
        })
    }

    async fn run(&self, app_id: &str, branch: &str) -> Result<Release, PlatformError> {
        let preview_version = self.store().count_releases(app_id).await? + 1;
        let step_delay = Duration::from_millis(self.config.step_delay_ms);

        for line in build_script(app_id, preview_version, &self.config.public_url_base) {
            self.broadcaster
                .publish(app_id, LOG_SOURCE_BUILD, &line)
                .await?;
            tokio::time::sleep(step_delay).await;
        }

        self.store().touch_status(app_id, AppStatus::Running).await?;
        let release = self
            .releases
            .create_release(app_id, &format!("Deploy {branch}"))
            .await?;
        self.writer.record_deployment(app_id, Utc::now()).await;
        Ok(release)
    }

    pub fn is_deploying(&self, app_id: &str) -> bool {
        self.in_flight.contains_key(app_id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait until no deployment is running. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            while !self.in_flight.is_empty() {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    pub async fn stats(&self) -> Result<DeployStats, PlatformError> {
        let cache = self.writer.cache();
        let total_deploys = match cache.get(TOTAL_DEPLOYS_KEY).await? {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| CacheError::WrongType(TOTAL_DEPLOYS_KEY.to_string()))?,
            None => 0,
        };
        let recent_deploys = cache
            .sorted_desc(DEPLOYS_BY_APP_KEY, RECENT_DEPLOYS_LIMIT)
            .await?;
        Ok(DeployStats {
            total_deploys,
            recent_deploys,
        })
    }
}
