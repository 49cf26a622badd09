use std::time::Duration;

use bera::platform::deployment::build_script;
use bera::platform::store::{AppStatus, DurableStore};
use bera::proto::platform::{AppRequest, DeployRequest, GetStatsRequest};
use bera::test_harness::TestEnvironment;
use tonic::Code;

use super::{collect_build_lines, create_app, open_observer, poll_until};

#[tokio::test]
async fn test_deploy_streams_build_output_and_goes_live() {
    let env = TestEnvironment::new().await.unwrap();
    let app_id = create_app(&env, "shop").await;
    let mut observer = open_observer(&env.stream_client).await;

    let ack = env
        .client
        .clone()
        .deploy(DeployRequest {
            app_id: app_id.clone(),
            branch: Some("main".to_string()),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(ack.status, "started");

    let lines = collect_build_lines(&mut observer, &app_id).await;
    assert_eq!(
        lines,
        build_script(&app_id, 1, "https://berahost.up.railway.app")
    );
    let url = lines.last().unwrap().rsplit(' ').next().unwrap();
    assert!(url.starts_with("https://") && !url.contains(char::is_whitespace));

    let running = poll_until(Duration::from_secs(5), Duration::from_millis(20), || {
        let store = env.store.clone();
        let app_id = app_id.clone();
        async move {
            let app = store.get_application(&app_id).await.ok()?;
            (app.status == AppStatus::Running).then_some(app)
        }
    })
    .await;
    assert!(running.is_some(), "application never reached running");

    let releases = poll_until(Duration::from_secs(5), Duration::from_millis(20), || {
        let mut client = env.client.clone();
        let app_id = app_id.clone();
        async move {
            let releases = client
                .list_releases(AppRequest { app_id })
                .await
                .ok()?
                .into_inner()
                .releases;
            (!releases.is_empty()).then_some(releases)
        }
    })
    .await
    .unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].version, 1);
    assert!(releases[0].description.contains("main"));

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_is_deploying_until_the_build_finishes() {
    let mut settings = bera::test_harness::test_settings();
    settings.deploy.step_delay_ms = 30;
    let env = TestEnvironment::with_settings(settings).await.unwrap();
    let app_id = create_app(&env, "slow").await;

    env.client
        .clone()
        .deploy(DeployRequest {
            app_id: app_id.clone(),
            branch: None,
        })
        .await
        .unwrap();

    let app = env
        .client
        .clone()
        .get_app(AppRequest {
            app_id: app_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(app.status, "deploying");

    let second = env
        .client
        .clone()
        .deploy(DeployRequest {
            app_id: app_id.clone(),
            branch: None,
        })
        .await
        .unwrap_err();
    assert_eq!(second.code(), Code::AlreadyExists);

    assert!(env
        .wait_for_status(&app_id, AppStatus::Running, Duration::from_secs(5))
        .await
        .unwrap());
    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropped_observer_does_not_affect_others() {
    let mut settings = bera::test_harness::test_settings();
    settings.deploy.step_delay_ms = 10;
    let env = TestEnvironment::with_settings(settings).await.unwrap();
    let app_id = create_app(&env, "shared").await;

    let mut staying = open_observer(&env.stream_client).await;
    let mut leaving = open_observer(&env.stream_client).await;
    assert_eq!(env.engine().observers.len(), 2);

    env.client
        .clone()
        .deploy(DeployRequest {
            app_id: app_id.clone(),
            branch: None,
        })
        .await
        .unwrap();

    // Read one line, then go away mid-deployment
    loop {
        let frame = leaving.frames.message().await.unwrap().unwrap();
        if frame.r#type == "log" {
            break;
        }
    }
    drop(leaving);

    let lines = collect_build_lines(&mut staying, &app_id).await;
    assert_eq!(lines.len(), 16);

    let pruned = poll_until(Duration::from_secs(5), Duration::from_millis(20), || {
        let observers = env.engine().observers.clone();
        async move { (observers.len() == 1).then_some(()) }
    })
    .await;
    assert!(pruned.is_some(), "disconnected observer was never removed");

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deploy_unknown_app_is_not_found() {
    let env = TestEnvironment::new().await.unwrap();

    let err = env
        .client
        .clone()
        .deploy(DeployRequest {
            app_id: "ghost".to_string(),
            branch: None,
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::NotFound);
    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stats_list_recent_deployments() {
    let env = TestEnvironment::new().await.unwrap();
    let first = create_app(&env, "first").await;
    let second = create_app(&env, "second").await;

    for app_id in [&first, &second] {
        env.client
            .clone()
            .deploy(DeployRequest {
                app_id: app_id.clone(),
                branch: None,
            })
            .await
            .unwrap();
        assert!(env
            .wait_for_status(app_id, AppStatus::Running, Duration::from_secs(5))
            .await
            .unwrap());
        assert!(env.engine().deployments.wait_idle(Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stats = env
        .client
        .clone()
        .get_stats(GetStatsRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stats.total_deploys, 2);
    assert_eq!(stats.recent_deploys, vec![second, first]);

    env.shutdown().await.unwrap();
}
