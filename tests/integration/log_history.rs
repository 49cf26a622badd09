use std::time::Duration;

use bera::platform::cache::{logs_key, RecentLogCache};
use bera::platform::store::AppStatus;
use bera::proto::platform::{AppRequest, DeployRequest};
use bera::test_harness::TestEnvironment;

use super::create_app;

#[tokio::test]
async fn test_recent_logs_come_from_cache_then_store() {
    let env = TestEnvironment::new().await.unwrap();
    let app_id = create_app(&env, "shop").await;
    let mut client = env.client.clone();

    client
        .deploy(DeployRequest {
            app_id: app_id.clone(),
            branch: None,
        })
        .await
        .unwrap();
    assert!(env
        .wait_for_status(&app_id, AppStatus::Running, Duration::from_secs(5))
        .await
        .unwrap());

    let warm = client
        .get_logs(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(warm.from_cache);
    assert_eq!(warm.logs.len(), 16);
    assert_eq!(warm.logs[0].content, "-----> Building source...");
    assert!(warm.logs[15].content.starts_with("-----> App is live at "));
    assert!(warm.logs.iter().all(|log| log.source == "build"));

    env.cache.delete(&logs_key(&app_id)).await.unwrap();

    let cold = client
        .get_logs(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!cold.from_cache);
    let warm_lines: Vec<_> = warm.logs.iter().map(|log| &log.content).collect();
    let cold_lines: Vec<_> = cold.logs.iter().map(|log| &log.content).collect();
    assert_eq!(cold_lines, warm_lines);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_app_has_no_logs() {
    let env = TestEnvironment::new().await.unwrap();

    let logs = env
        .client
        .clone()
        .get_logs(AppRequest {
            app_id: "ghost".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    assert!(logs.logs.is_empty());
    assert!(!logs.from_cache);
    env.shutdown().await.unwrap();
}
