use std::collections::HashSet;

use bera::proto::platform::{
    AppRequest, AttachAddonRequest, ListCatalogRequest, RemoveConfigVarRequest,
    SetConfigVarRequest,
};
use bera::test_harness::TestEnvironment;
use tonic::Code;

use super::create_app;

fn set_var(app_id: &str, key: &str, value: &str) -> SetConfigVarRequest {
    SetConfigVarRequest {
        app_id: app_id.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[tokio::test]
async fn test_config_changes_produce_sequential_releases() {
    let env = TestEnvironment::new().await.unwrap();
    let app_id = create_app(&env, "shop").await;
    let mut client = env.client.clone();

    let first = client
        .set_config_var(set_var(&app_id, "API_KEY", "one"))
        .await
        .unwrap()
        .into_inner();
    let second = client
        .set_config_var(set_var(&app_id, "API_KEY", "two"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!((first.release_version, second.release_version), (1, 2));

    let vars = client
        .list_config_vars(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .config_vars;
    assert_eq!(vars.len(), 1);

    let removed = client
        .remove_config_var(RemoveConfigVarRequest {
            config_var_id: vars[0].id,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(removed.release_version, 3);
    assert_eq!(removed.key, "API_KEY");

    let latest = client
        .get_latest_release(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .release
        .unwrap();
    assert_eq!(latest.version, 3);
    assert_eq!(latest.description, "Remove config var API_KEY");

    let missing = client
        .remove_config_var(RemoveConfigVarRequest { config_var_id: 424242 })
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::NotFound);

    env.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_config_changes_get_unique_versions() {
    let env = TestEnvironment::new().await.unwrap();
    let app_id = create_app(&env, "busy").await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let mut client = env.client.clone();
            let app_id = app_id.clone();
            tokio::spawn(async move {
                client
                    .set_config_var(set_var(&app_id, &format!("KEY_{i}"), "v"))
                    .await
                    .unwrap()
                    .into_inner()
                    .release_version
            })
        })
        .collect();

    let mut versions = HashSet::new();
    for handle in handles {
        assert!(versions.insert(handle.await.unwrap()));
    }
    assert_eq!(versions, (1..=20).collect::<HashSet<_>>());

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_attach_addon_adds_config_and_activity() {
    let env = TestEnvironment::new().await.unwrap();
    let app_id = create_app(&env, "shop").await;
    let mut client = env.client.clone();

    let catalog = client
        .list_catalog(ListCatalogRequest {})
        .await
        .unwrap()
        .into_inner()
        .items;
    assert_eq!(catalog.len(), 3);

    let attached = client
        .attach_addon(AttachAddonRequest {
            app_id: app_id.clone(),
            addon_id: "bera-redis".to_string(),
            plan: None,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(attached.config_key, "BERA_REDIS_URL");
    assert_eq!(attached.release_version, 1);
    let addon = attached.addon.unwrap();
    assert_eq!(addon.plan, "Free");
    assert_eq!(addon.status, "provisioning");

    let activity = client
        .list_activity(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner()
        .activity;
    let actions: Vec<_> = activity.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["addon:create", "release"]);
    assert_eq!(activity[0].description, "Attached Bera Redis");

    let unknown = client
        .attach_addon(AttachAddonRequest {
            app_id: app_id.clone(),
            addon_id: "bera-kafka".to_string(),
            plan: None,
        })
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::NotFound);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deleted_app_is_gone() {
    let env = TestEnvironment::new().await.unwrap();
    let app_id = create_app(&env, "doomed").await;
    let mut client = env.client.clone();
    client
        .set_config_var(set_var(&app_id, "K", "v"))
        .await
        .unwrap();

    let deleted = client
        .delete_app(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(deleted.deleted);

    let again = client
        .delete_app(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(again.code(), Code::NotFound);

    let latest = client
        .get_latest_release(AppRequest { app_id })
        .await
        .unwrap()
        .into_inner();
    assert!(latest.release.is_none());

    env.shutdown().await.unwrap();
}
