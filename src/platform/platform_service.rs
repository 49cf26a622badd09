use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use tonic::{Request, Response, Status};

use crate::platform::deployment::DEPLOY_STATUS_STARTED;
use crate::platform::engine::Engine;
use crate::platform::store;
use crate::proto::platform as pb;
use pb::platform_service_server::{PlatformService, PlatformServiceServer};

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<store::Application> for pb::App {
    fn from(app: store::Application) -> Self {
        pb::App {
            status: app.status.to_string(),
            created_at: timestamp(&app.created_at),
            updated_at: timestamp(&app.updated_at),
            id: app.id,
            name: app.name,
            region: app.region,
        }
    }
}

impl From<store::ConfigVar> for pb::ConfigVar {
    fn from(var: store::ConfigVar) -> Self {
        pb::ConfigVar {
            id: var.id,
            app_id: var.app_id,
            key: var.key,
            value: var.value,
        }
    }
}

impl From<store::CatalogItem> for pb::CatalogItem {
    fn from(item: store::CatalogItem) -> Self {
        pb::CatalogItem {
            id: item.id,
            name: item.name,
            description: item.description,
            category: item.category,
            icon: item.icon,
        }
    }
}

impl From<store::Addon> for pb::Addon {
    fn from(addon: store::Addon) -> Self {
        pb::Addon {
            id: addon.id,
            app_id: addon.app_id,
            name: addon.name,
            plan: addon.plan,
            status: addon.status,
        }
    }
}

impl From<store::ActivityEvent> for pb::Activity {
    fn from(event: store::ActivityEvent) -> Self {
        pb::Activity {
            timestamp: timestamp(&event.timestamp),
            id: event.id,
            app_id: event.app_id,
            actor: event.actor,
            action: event.action,
            description: event.description,
        }
    }
}

impl From<store::Release> for pb::Release {
    fn from(release: store::Release) -> Self {
        pb::Release {
            created_at: timestamp(&release.created_at),
            app_id: release.app_id,
            version: release.version,
            description: release.description,
            status: release.status,
        }
    }
}

fn convert_all<T, U: From<T>>(items: Vec<T>) -> Vec<U> {
    items.into_iter().map(U::from).collect()
}

/// Request/response surface over the engine
#[derive(Clone)]
pub struct PlatformServiceImpl {
    engine: Engine,
}

impl PlatformServiceImpl {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn into_server(self) -> PlatformServiceServer<Self> {
        PlatformServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl PlatformService for PlatformServiceImpl {
    async fn create_app(
        &self,
        request: Request<pb::CreateAppRequest>,
    ) -> Result<Response<pb::App>, Status> {
        let req = request.into_inner();
        let app = self.engine.apps.create_app(&req.name, &req.region).await?;
        Ok(Response::new(app.into()))
    }

    async fn get_app(&self, request: Request<pb::AppRequest>) -> Result<Response<pb::App>, Status> {
        let app = self.engine.apps.get_app(&request.into_inner().app_id).await?;
        Ok(Response::new(app.into()))
    }

    async fn list_apps(
        &self,
        _request: Request<pb::ListAppsRequest>,
    ) -> Result<Response<pb::ListAppsResponse>, Status> {
        let apps = self.engine.apps.list_apps().await?;
        Ok(Response::new(pb::ListAppsResponse {
            apps: convert_all(apps),
        }))
    }

    async fn delete_app(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::DeleteAppResponse>, Status> {
        self.engine
            .apps
            .delete_app(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::DeleteAppResponse { deleted: true }))
    }

    async fn list_config_vars(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::ListConfigVarsResponse>, Status> {
        let vars = self
            .engine
            .apps
            .list_config_vars(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::ListConfigVarsResponse {
            config_vars: convert_all(vars),
        }))
    }

    async fn set_config_var(
        &self,
        request: Request<pb::SetConfigVarRequest>,
    ) -> Result<Response<pb::ConfigChangeResponse>, Status> {
        let req = request.into_inner();
        let change = self
            .engine
            .apps
            .set_config_var(&req.app_id, &req.key, &req.value)
            .await?;
        Ok(Response::new(pb::ConfigChangeResponse {
            app_id: change.app_id,
            key: change.key,
            release_version: change.release.version,
        }))
    }

    async fn remove_config_var(
        &self,
        request: Request<pb::RemoveConfigVarRequest>,
    ) -> Result<Response<pb::ConfigChangeResponse>, Status> {
        let change = self
            .engine
            .apps
            .remove_config_var(request.into_inner().config_var_id)
            .await?;
        Ok(Response::new(pb::ConfigChangeResponse {
            app_id: change.app_id,
            key: change.key,
            release_version: change.release.version,
        }))
    }

    async fn list_catalog(
        &self,
        _request: Request<pb::ListCatalogRequest>,
    ) -> Result<Response<pb::ListCatalogResponse>, Status> {
        let items = self.engine.apps.list_catalog().await?;
        Ok(Response::new(pb::ListCatalogResponse {
            items: convert_all(items),
        }))
    }

    async fn list_addons(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::ListAddonsResponse>, Status> {
        let addons = self
            .engine
            .apps
            .list_addons(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::ListAddonsResponse {
            addons: convert_all(addons),
        }))
    }

    async fn attach_addon(
        &self,
        request: Request<pb::AttachAddonRequest>,
    ) -> Result<Response<pb::AttachAddonResponse>, Status> {
        let req = request.into_inner();
        let attached = self
            .engine
            .apps
            .attach_addon(&req.app_id, &req.addon_id, req.plan.as_deref())
            .await?;
        Ok(Response::new(pb::AttachAddonResponse {
            addon: Some(attached.addon.into()),
            config_key: attached.config_key,
            release_version: attached.release.version,
        }))
    }

    async fn list_activity(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::ListActivityResponse>, Status> {
        let activity = self
            .engine
            .apps
            .list_activity(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::ListActivityResponse {
            activity: convert_all(activity),
        }))
    }

    async fn list_releases(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::ListReleasesResponse>, Status> {
        let releases = self
            .engine
            .apps
            .list_releases(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::ListReleasesResponse {
            releases: convert_all(releases),
        }))
    }

    async fn get_latest_release(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::GetLatestReleaseResponse>, Status> {
        let release = self
            .engine
            .apps
            .latest_release(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::GetLatestReleaseResponse {
            release: release.map(Into::into),
        }))
    }

    async fn get_logs(
        &self,
        request: Request<pb::AppRequest>,
    ) -> Result<Response<pb::GetLogsResponse>, Status> {
        let recent = self
            .engine
            .broadcaster
            .recent_logs(&request.into_inner().app_id)
            .await?;
        Ok(Response::new(pb::GetLogsResponse {
            logs: recent.entries.iter().map(pb::LogData::from).collect(),
            from_cache: recent.from_cache,
        }))
    }

    async fn deploy(
        &self,
        request: Request<pb::DeployRequest>,
    ) -> Result<Response<pb::DeployResponse>, Status> {
        let req = request.into_inner();
        let mut handle = self
            .engine
            .deployments
            .deploy(&req.app_id, req.branch.as_deref())
            .await?;
        info!(
            "Acknowledged deployment of application {} ({})",
            handle.app_id, handle.branch
        );
        let ack = Response::new(pb::DeployResponse {
            status: DEPLOY_STATUS_STARTED.to_string(),
        });
        handle.start();
        Ok(ack)
    }

    async fn get_stats(
        &self,
        _request: Request<pb::GetStatsRequest>,
    ) -> Result<Response<pb::GetStatsResponse>, Status> {
        let stats = self.engine.deployments.stats().await?;
        Ok(Response::new(pb::GetStatsResponse {
            total_deploys: stats.total_deploys,
            recent_deploys: stats.recent_deploys,
        }))
    }
}
