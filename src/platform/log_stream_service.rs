use futures::StreamExt;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Streaming};
use uuid::Uuid;

use crate::platform::broadcaster::BroadcastMessage;
use crate::platform::engine::Engine;
use crate::platform::observer_registry::{ObserverRegistry, ObserverTxChannel};
use crate::proto::platform::log_stream_service_server::{LogStreamService, LogStreamServiceServer};
use crate::proto::platform::{ObserverMsg, StreamMessage};

/// The shared real-time log channel. Opening a stream registers an observer
/// that receives every application's log lines until it disconnects.
pub struct LogStreamServiceImpl {
    engine: Engine,
    keepalive: Duration,
}

impl LogStreamServiceImpl {
    pub fn new(engine: Engine) -> Self {
        let keepalive = Duration::from_secs(engine.stream_config.keepalive_secs.max(1));
        Self { engine, keepalive }
    }

    pub fn into_server(self) -> LogStreamServiceServer<Self> {
        LogStreamServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl LogStreamService for LogStreamServiceImpl {
    type StreamStream = ReceiverStream<Result<StreamMessage, tonic::Status>>;

    async fn stream(
        &self,
        request: Request<Streaming<ObserverMsg>>,
    ) -> Result<Response<Self::StreamStream>, tonic::Status> {
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(self.engine.stream_config.observer_buffer.max(1));

        let observer_id = Uuid::new_v4();
        let observers = self.engine.observers.clone();
        if !observers.register(observer_id, tx.clone()) {
            return Err(tonic::Status::unavailable("log stream is shutting down"));
        }
        info!("Observer {observer_id} connected");

        let keepalive = self.keepalive;
        tokio::spawn(async move {
            handle_observer_connection(observer_id, inbound, tx, &observers, keepalive).await;
            observers.unregister(observer_id);
            info!("Observer {observer_id} disconnected");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Runs until the observer's transport closes or the registry is closed at
/// shutdown. An observer that stops sending keeps receiving; only the
/// outbound side decides the lifetime.
async fn handle_observer_connection(
    observer_id: Uuid,
    mut inbound: Streaming<ObserverMsg>,
    tx: ObserverTxChannel,
    observers: &Arc<ObserverRegistry>,
    keepalive: Duration,
) {
    let mut inbound_open = true;
    let mut ping_interval = tokio::time::interval(keepalive);
    ping_interval.tick().await;
    let registry_closed = observers.closed();
    tokio::pin!(registry_closed);

    loop {
        tokio::select! {
            message = inbound.next(), if inbound_open => {
                match message {
                    Some(Ok(_)) => observers.mark_alive(observer_id),
                    Some(Err(e)) => {
                        debug!("Observer {observer_id} inbound error: {e}");
                        inbound_open = false;
                    }
                    None => inbound_open = false,
                }
            }

            _ = tx.closed() => break,

            _ = &mut registry_closed => {
                debug!("Observer {observer_id} closed by shutdown");
                break;
            }

            _ = ping_interval.tick() => {
                if !observers.is_registered(observer_id) {
                    break;
                }
                let ping = StreamMessage::from(BroadcastMessage::Ping);
                match tx.try_send(Ok(ping)) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }

    if !inbound_open {
        debug!("Observer {observer_id} had stopped sending before disconnecting");
    }
}
