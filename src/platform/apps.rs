use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use crate::platform::db::AddonsConfig;
use crate::platform::dual_write::DualWriter;
use crate::platform::error::PlatformError;
use crate::platform::release::ReleaseSequencer;
use crate::platform::store::{
    ActivityEvent, Addon, Application, CatalogItem, ConfigVar, DurableStore, Release,
};
use crate::{
    ACTIVITY_ACTION_ADDON_CREATE, ACTIVITY_ACTOR_SYSTEM, ADDON_DEFAULT_PLAN,
    ADDON_STATUS_PROVISIONING,
};

const APP_ID_LEN: usize = 16;
const ADDON_ID_LEN: usize = 12;
const ADDON_SECRET_LEN: usize = 4;
const DEFAULT_REGION: &str = "us";

const POSTGRES_ADDON_ID: &str = "bera-postgresql";
const REDIS_ADDON_ID: &str = "bera-redis";

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// `Bera Postgres` becomes `BERA_POSTGRES_URL`
pub fn addon_config_key(addon_name: &str) -> String {
    format!("{}_URL", addon_name.to_uppercase().replace(' ', "_"))
}

fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, PlatformError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PlatformError::InvalidArgument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed)
}

/// A configuration change and the release it produced
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub app_id: String,
    pub key: String,
    pub release: Release,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachedAddon {
    pub addon: Addon,
    pub config_key: String,
    pub release: Release,
}

/// Applications and everything attached to them apart from deployments.
pub struct AppManager {
    writer: Arc<DualWriter>,
    releases: Arc<ReleaseSequencer>,
    addons: AddonsConfig,
}

impl AppManager {
    pub fn new(
        writer: Arc<DualWriter>,
        releases: Arc<ReleaseSequencer>,
        addons: AddonsConfig,
    ) -> Self {
        Self {
            writer,
            releases,
            addons,
        }
    }

    fn store(&self) -> &Arc<dyn DurableStore> {
        self.writer.store()
    }

    pub async fn create_app(&self, name: &str, region: &str) -> Result<Application, PlatformError> {
        let name = require_non_empty("name", name)?;
        let region = match region.trim() {
            "" => DEFAULT_REGION,
            region => region,
        };
        let id = random_token(APP_ID_LEN);

        let app = self.store().create_application(&id, name, region).await?;
        info!("Created application {} ({}) in {}", app.id, app.name, app.region);
        Ok(app)
    }

    pub async fn get_app(&self, app_id: &str) -> Result<Application, PlatformError> {
        self.store().get_application(app_id).await
    }

    pub async fn list_apps(&self) -> Result<Vec<Application>, PlatformError> {
        self.store().list_applications().await
    }

    /// Removes the application with everything it owns, then its cache keys
    pub async fn delete_app(&self, app_id: &str) -> Result<(), PlatformError> {
        if !self.store().delete_application(app_id).await? {
            return Err(PlatformError::not_found("application", app_id));
        }
        self.writer.purge_application(app_id).await;
        self.releases.forget(app_id);
        info!("Deleted application {app_id}");
        Ok(())
    }

    pub async fn list_config_vars(&self, app_id: &str) -> Result<Vec<ConfigVar>, PlatformError> {
        self.store().list_config_vars(app_id).await
    }

    pub async fn set_config_var(
        &self,
        app_id: &str,
        key: &str,
        value: &str,
    ) -> Result<ConfigChange, PlatformError> {
        let key = require_non_empty("key", key)?;
        let var = self.store().upsert_config_var(app_id, key, value).await?;
        let release = self
            .releases
            .create_release(app_id, &format!("Set config var {}", var.key))
            .await?;
        Ok(ConfigChange {
            app_id: var.app_id,
            key: var.key,
            release,
        })
    }

    pub async fn remove_config_var(&self, config_var_id: i64) -> Result<ConfigChange, PlatformError> {
        let var = self
            .store()
            .delete_config_var(config_var_id)
            .await?
            .ok_or_else(|| PlatformError::not_found("config var", config_var_id))?;
        let release = self
            .releases
            .create_release(&var.app_id, &format!("Remove config var {}", var.key))
            .await?;
        Ok(ConfigChange {
            app_id: var.app_id,
            key: var.key,
            release,
        })
    }

    pub async fn list_catalog(&self) -> Result<Vec<CatalogItem>, PlatformError> {
        self.store().list_catalog().await
    }

    pub async fn list_addons(&self, app_id: &str) -> Result<Vec<Addon>, PlatformError> {
        self.store().list_addons(app_id).await
    }

    /// Provision an add-on from the catalog and expose its connection URL to
    /// the application as a config var
    pub async fn attach_addon(
        &self,
        app_id: &str,
        addon_id: &str,
        plan: Option<&str>,
    ) -> Result<AttachedAddon, PlatformError> {
        let item = self
            .store()
            .get_catalog_item(addon_id)
            .await?
            .ok_or_else(|| PlatformError::not_found("add-on", addon_id))?;

        let addon = Addon {
            id: random_token(ADDON_ID_LEN),
            app_id: app_id.to_string(),
            name: item.name.clone(),
            plan: plan
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or(ADDON_DEFAULT_PLAN)
                .to_string(),
            status: ADDON_STATUS_PROVISIONING.to_string(),
        };
        self.store().insert_addon(&addon).await?;

        let config_key = addon_config_key(&item.name);
        let config_value = self.addon_url(&item.id);
        let change = self.set_config_var(app_id, &config_key, &config_value).await?;

        self.store()
            .append_activity(
                app_id,
                ACTIVITY_ACTOR_SYSTEM,
                ACTIVITY_ACTION_ADDON_CREATE,
                &format!("Attached {}", item.name),
            )
            .await?;
        info!("Attached {} ({}) to application {app_id}", item.name, addon.plan);

        Ok(AttachedAddon {
            addon,
            config_key: change.key,
            release: change.release,
        })
    }

    fn addon_url(&self, addon_id: &str) -> String {
        let configured = match addon_id {
            POSTGRES_ADDON_ID => self.addons.postgres_url.clone(),
            REDIS_ADDON_ID => self.addons.redis_url.clone(),
            _ => None,
        };
        configured.unwrap_or_else(|| {
            format!(
                "bera://{addon_id}:{}@internal:5432",
                random_token(ADDON_SECRET_LEN)
            )
        })
    }

    pub async fn list_activity(&self, app_id: &str) -> Result<Vec<ActivityEvent>, PlatformError> {
        self.store().list_activity(app_id).await
    }

    pub async fn list_releases(&self, app_id: &str) -> Result<Vec<Release>, PlatformError> {
        self.store().list_releases(app_id).await
    }

    pub async fn latest_release(&self, app_id: &str) -> Result<Option<Release>, PlatformError> {
        self.releases.latest_release(app_id).await
    }
}
