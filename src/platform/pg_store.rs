use tokio_postgres::Row;

use crate::platform::db::PgPool;
use crate::platform::error::PlatformError;
use crate::platform::store::{
    ActivityEvent, Addon, AppStatus, Application, CatalogItem, ConfigVar, DurableStore, LogEntry,
    Release, StoreResult,
};

/// PostgreSQL-backed [`DurableStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn application_from_row(row: &Row) -> StoreResult<Application> {
    let status: String = row.get("status");
    Ok(Application {
        id: row.get("id"),
        name: row.get("name"),
        region: row.get("region"),
        status: status.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn config_var_from_row(row: &Row) -> ConfigVar {
    ConfigVar {
        id: row.get("id"),
        app_id: row.get("app_id"),
        key: row.get("key"),
        value: row.get("value"),
    }
}

fn release_from_row(row: &Row) -> Release {
    Release {
        app_id: row.get("app_id"),
        version: row.get("version"),
        description: row.get("description"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

fn log_from_row(row: &Row) -> LogEntry {
    LogEntry {
        application_id: row.get("app_id"),
        source: row.get("source"),
        content: row.get("content"),
        timestamp: row.get("timestamp"),
    }
}

fn catalog_item_from_row(row: &Row) -> CatalogItem {
    CatalogItem {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        category: row.get("category"),
        icon: row.get("icon"),
    }
}

fn addon_from_row(row: &Row) -> Addon {
    Addon {
        id: row.get("id"),
        app_id: row.get("app_id"),
        name: row.get("name"),
        plan: row.get("plan"),
        status: row.get("status"),
    }
}

#[tonic::async_trait]
impl DurableStore for PgStore {
    async fn create_application(
        &self,
        id: &str,
        name: &str,
        region: &str,
    ) -> StoreResult<Application> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO apps (id, name, region) VALUES ($1, $2, $3)
                 RETURNING id, name, region, status, created_at, updated_at",
                &[&id, &name, &region],
            )
            .await?;
        application_from_row(&row)
    }

    async fn get_application(&self, app_id: &str) -> StoreResult<Application> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, region, status, created_at, updated_at FROM apps WHERE id = $1",
                &[&app_id],
            )
            .await?
            .ok_or_else(|| PlatformError::not_found("application", app_id))?;
        application_from_row(&row)
    }

    async fn list_applications(&self) -> StoreResult<Vec<Application>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, name, region, status, created_at, updated_at FROM apps
                 ORDER BY created_at DESC",
                &[],
            )
            .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn delete_application(&self, app_id: &str) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM apps WHERE id = $1", &[&app_id])
            .await?;
        Ok(deleted > 0)
    }

    async fn set_status(&self, app_id: &str, status: AppStatus) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE apps SET status = $2 WHERE id = $1",
                &[&app_id, &status.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(PlatformError::not_found("application", app_id));
        }
        Ok(())
    }

    async fn touch_status(&self, app_id: &str, status: AppStatus) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE apps SET status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
                &[&app_id, &status.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(PlatformError::not_found("application", app_id));
        }
        Ok(())
    }

    async fn list_config_vars(&self, app_id: &str) -> StoreResult<Vec<ConfigVar>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, app_id, key, value FROM config_vars WHERE app_id = $1 ORDER BY key",
                &[&app_id],
            )
            .await?;
        Ok(rows.iter().map(config_var_from_row).collect())
    }

    async fn upsert_config_var(
        &self,
        app_id: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<ConfigVar> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO config_vars (app_id, key, value) VALUES ($1, $2, $3)
                 ON CONFLICT (app_id, key) DO UPDATE SET value = EXCLUDED.value
                 RETURNING id, app_id, key, value",
                &[&app_id, &key, &value],
            )
            .await?;
        Ok(config_var_from_row(&row))
    }

    async fn delete_config_var(&self, id: i64) -> StoreResult<Option<ConfigVar>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "DELETE FROM config_vars WHERE id = $1 RETURNING id, app_id, key, value",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(config_var_from_row))
    }

    async fn list_catalog(&self) -> StoreResult<Vec<CatalogItem>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, name, description, category, icon FROM addons_catalog ORDER BY id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(catalog_item_from_row).collect())
    }

    async fn get_catalog_item(&self, id: &str) -> StoreResult<Option<CatalogItem>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, name, description, category, icon FROM addons_catalog WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(catalog_item_from_row))
    }

    async fn insert_addon(&self, addon: &Addon) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO addons (id, app_id, name, plan, status) VALUES ($1, $2, $3, $4, $5)",
                &[
                    &addon.id,
                    &addon.app_id,
                    &addon.name,
                    &addon.plan,
                    &addon.status,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_addons(&self, app_id: &str) -> StoreResult<Vec<Addon>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, app_id, name, plan, status FROM addons WHERE app_id = $1 ORDER BY name",
                &[&app_id],
            )
            .await?;
        Ok(rows.iter().map(addon_from_row).collect())
    }

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO logs (app_id, source, content, timestamp) VALUES ($1, $2, $3, $4)",
                &[
                    &entry.application_id,
                    &entry.source,
                    &entry.content,
                    &entry.timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn recent_logs(&self, app_id: &str, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let client = self.pool.get().await?;
        let limit = limit as i64;
        let rows = client
            .query(
                "SELECT app_id, source, content, timestamp FROM logs WHERE app_id = $1
                 ORDER BY timestamp DESC, id DESC LIMIT $2",
                &[&app_id, &limit],
            )
            .await?;
        let mut logs: Vec<LogEntry> = rows.iter().map(log_from_row).collect();
        logs.reverse();
        Ok(logs)
    }

    async fn max_release_version(&self, app_id: &str) -> StoreResult<i32> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COALESCE(MAX(version), 0) FROM releases WHERE app_id = $1",
                &[&app_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn count_releases(&self, app_id: &str) -> StoreResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM releases WHERE app_id = $1",
                &[&app_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn insert_release(
        &self,
        app_id: &str,
        version: i32,
        description: &str,
        status: &str,
    ) -> StoreResult<Release> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO releases (app_id, version, description, status) VALUES ($1, $2, $3, $4)
                 RETURNING app_id, version, description, status, created_at",
                &[&app_id, &version, &description, &status],
            )
            .await?;
        Ok(release_from_row(&row))
    }

    async fn list_releases(&self, app_id: &str) -> StoreResult<Vec<Release>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT app_id, version, description, status, created_at FROM releases
                 WHERE app_id = $1 ORDER BY version DESC",
                &[&app_id],
            )
            .await?;
        Ok(rows.iter().map(release_from_row).collect())
    }

    async fn latest_release(&self, app_id: &str) -> StoreResult<Option<Release>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT app_id, version, description, status, created_at FROM releases
                 WHERE app_id = $1 ORDER BY version DESC LIMIT 1",
                &[&app_id],
            )
            .await?;
        Ok(row.as_ref().map(release_from_row))
    }

    async fn append_activity(
        &self,
        app_id: &str,
        actor: &str,
        action: &str,
        description: &str,
    ) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO activity (app_id, actor, action, description) VALUES ($1, $2, $3, $4)",
                &[&app_id, &actor, &action, &description],
            )
            .await?;
        Ok(())
    }

    async fn list_activity(&self, app_id: &str) -> StoreResult<Vec<ActivityEvent>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, app_id, actor, action, description, timestamp FROM activity
                 WHERE app_id = $1 ORDER BY timestamp DESC, id DESC",
                &[&app_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ActivityEvent {
                id: row.get("id"),
                app_id: row.get("app_id"),
                actor: row.get("actor"),
                action: row.get("action"),
                description: row.get("description"),
                timestamp: row.get("timestamp"),
            })
            .collect())
    }
}
