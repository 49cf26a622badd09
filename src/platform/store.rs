use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::platform::error::PlatformError;

pub type StoreResult<T> = Result<T, PlatformError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Idle,
    Deploying,
    Running,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Idle => "idle",
            AppStatus::Deploying => "deploying",
            AppStatus::Running => "running",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppStatus {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AppStatus::Idle),
            "deploying" => Ok(AppStatus::Deploying),
            "running" => Ok(AppStatus::Running),
            other => Err(PlatformError::InvalidArgument(format!(
                "unknown application status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub region: String,
    pub status: AppStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigVar {
    pub id: i64,
    pub app_id: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub app_id: String,
    pub version: i32,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One operational log line. The serialized form is what observers and the
/// recent-log cache see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub application_id: String,
    pub source: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn now(application_id: &str, source: &str, content: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            source: source.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub id: i64,
    pub app_id: String,
    pub actor: String,
    pub action: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Addon {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub plan: String,
    pub status: String,
}

/// System of record for every persisted entity.
///
/// Each call is a single atomic statement; callers never rely on cross-table
/// transactions. Implementations report a duplicate `(app_id, version)` release
/// or a duplicate application name as [`PlatformError::Conflict`] and a
/// reference to a missing application as [`PlatformError::NotFound`].
#[tonic::async_trait]
pub trait DurableStore: Send + Sync {
    async fn create_application(
        &self,
        id: &str,
        name: &str,
        region: &str,
    ) -> StoreResult<Application>;

    async fn get_application(&self, app_id: &str) -> StoreResult<Application>;

    /// Newest first
    async fn list_applications(&self) -> StoreResult<Vec<Application>>;

    /// Cascades to every dependent row. Returns false when nothing was deleted.
    async fn delete_application(&self, app_id: &str) -> StoreResult<bool>;

    async fn set_status(&self, app_id: &str, status: AppStatus) -> StoreResult<()>;

    /// Like `set_status` but also moves `updated_at` to now.
    async fn touch_status(&self, app_id: &str, status: AppStatus) -> StoreResult<()>;

    async fn list_config_vars(&self, app_id: &str) -> StoreResult<Vec<ConfigVar>>;

    async fn upsert_config_var(&self, app_id: &str, key: &str, value: &str)
        -> StoreResult<ConfigVar>;

    async fn delete_config_var(&self, id: i64) -> StoreResult<Option<ConfigVar>>;

    async fn list_catalog(&self) -> StoreResult<Vec<CatalogItem>>;

    async fn get_catalog_item(&self, id: &str) -> StoreResult<Option<CatalogItem>>;

    async fn insert_addon(&self, addon: &Addon) -> StoreResult<()>;

    async fn list_addons(&self, app_id: &str) -> StoreResult<Vec<Addon>>;

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()>;

    /// The latest `limit` entries, oldest first
    async fn recent_logs(&self, app_id: &str, limit: usize) -> StoreResult<Vec<LogEntry>>;

    /// 0 when the application has no releases
    async fn max_release_version(&self, app_id: &str) -> StoreResult<i32>;

    async fn count_releases(&self, app_id: &str) -> StoreResult<i64>;

    async fn insert_release(
        &self,
        app_id: &str,
        version: i32,
        description: &str,
        status: &str,
    ) -> StoreResult<Release>;

    /// Highest version first
    async fn list_releases(&self, app_id: &str) -> StoreResult<Vec<Release>>;

    async fn latest_release(&self, app_id: &str) -> StoreResult<Option<Release>>;

    async fn append_activity(
        &self,
        app_id: &str,
        actor: &str,
        action: &str,
        description: &str,
    ) -> StoreResult<()>;

    /// Newest first
    async fn list_activity(&self, app_id: &str) -> StoreResult<Vec<ActivityEvent>>;
}
