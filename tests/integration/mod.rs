//! End-to-end tests against a platform server running on an ephemeral port.
//!
//! The server is backed by the in-memory store and cache from the test harness,
//! so no database container is needed. Run with:
//!
//! ```bash
//! cargo test --features test-harness
//! ```
//!
//! - **deployment_stream**: deploy acknowledgement, build output on the live stream
//! - **config_releases**: config var changes, add-ons and release numbering
//! - **log_history**: recent logs from the cache and from the store
//! - **life_cycle**: graceful shutdown with deployments and observers in flight

pub mod config_releases;
pub mod deployment_stream;
pub mod life_cycle;
pub mod log_history;

use bera::proto::platform::log_stream_service_client::LogStreamServiceClient;
use bera::proto::platform::{CreateAppRequest, ObserverMsg, StreamMessage};
use bera::test_harness::TestEnvironment;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::Streaming;

pub async fn poll_until<T, F, Fut>(
    timeout: std::time::Duration,
    interval: std::time::Duration,
    mut check: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }

        if Instant::now() >= deadline {
            return None;
        }

        tokio::time::sleep(interval).await;
    }
}

/// An open log stream. Keeping `heartbeat` alive keeps the inbound side open.
pub struct Observer {
    pub frames: Streaming<StreamMessage>,
    pub heartbeat: mpsc::Sender<ObserverMsg>,
}

pub async fn open_observer(client: &LogStreamServiceClient<Channel>) -> Observer {
    let (heartbeat, rx) = mpsc::channel(4);
    let frames = client
        .clone()
        .stream(ReceiverStream::new(rx))
        .await
        .expect("failed to open log stream")
        .into_inner();
    Observer { frames, heartbeat }
}

/// Log lines of `app_id` until the application reports live, skipping pings
/// and other applications
pub async fn collect_build_lines(observer: &mut Observer, app_id: &str) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(frame) = observer.frames.message().await.expect("stream error") {
        let Some(data) = frame.data else { continue };
        if data.application_id != app_id {
            continue;
        }
        let done = data.content.starts_with("-----> App is live at ");
        lines.push(data.content);
        if done {
            break;
        }
    }
    lines
}

pub async fn create_app(env: &TestEnvironment, name: &str) -> String {
    env.client
        .clone()
        .create_app(CreateAppRequest {
            name: name.to_string(),
            region: "us".to_string(),
        })
        .await
        .expect("failed to create app")
        .into_inner()
        .id
}
