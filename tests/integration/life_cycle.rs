use std::time::Duration;

use bera::platform::store::{AppStatus, DurableStore};
use bera::proto::platform::DeployRequest;
use bera::test_harness::{test_settings, TestEnvironment};

use super::{create_app, open_observer};

#[tokio::test]
async fn test_shutdown_lets_deployments_finish_and_ends_streams() {
    let mut settings = test_settings();
    settings.deploy.step_delay_ms = 20;
    let env = TestEnvironment::with_settings(settings).await.unwrap();
    let app_id = create_app(&env, "shop").await;
    let mut observer = open_observer(&env.stream_client).await;

    env.client
        .clone()
        .deploy(DeployRequest {
            app_id: app_id.clone(),
            branch: None,
        })
        .await
        .unwrap();

    let store = env.store.clone();
    env.shutdown().await.unwrap();

    assert_eq!(
        store.get_application(&app_id).await.unwrap().status,
        AppStatus::Running
    );
    assert_eq!(store.count_releases(&app_id).await.unwrap(), 1);

    let mut log_frames = 0;
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(Some(frame)) = observer.frames.message().await {
            if frame.r#type == "log" {
                log_frames += 1;
            }
        }
    })
    .await;
    assert!(drained.is_ok(), "observer stream did not end after shutdown");
    assert_eq!(log_frames, 16);
}

#[tokio::test]
async fn test_shutdown_is_prompt_with_heartbeating_observer() {
    let mut settings = test_settings();
    settings.stream.keepalive_secs = 60;
    let env = TestEnvironment::with_settings(settings).await.unwrap();
    let mut observer = open_observer(&env.stream_client).await;
    observer
        .heartbeat
        .send(bera::proto::platform::ObserverMsg { timestamp: 1 })
        .await
        .unwrap();
    let engine = env.engine().clone();
    let registered = super::poll_until(Duration::from_secs(5), Duration::from_millis(10), || {
        let engine = engine.clone();
        async move { (engine.observers.len() == 1).then_some(()) }
    })
    .await;
    assert!(registered.is_some());

    let started = std::time::Instant::now();
    env.shutdown().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    let ended = tokio::time::timeout(Duration::from_secs(1), observer.frames.message()).await;
    assert!(!matches!(ended, Ok(Ok(Some(_)))));
    drop(observer.heartbeat);
}
