use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::platform::cache::InMemoryCache;
use crate::platform::db::{create_pool, run_migrations, Settings};
use crate::platform::engine::Engine;
use crate::platform::log_stream_service::LogStreamServiceImpl;
use crate::platform::pg_store::PgStore;
use crate::platform::platform_service::PlatformServiceImpl;
use crate::proto::platform::log_stream_service_server::LogStreamServiceServer;
use crate::proto::platform::platform_service_server::PlatformServiceServer;

// Time allowed for connections to close after the engine has shut down
const SERVER_DRAIN_GRACE_SECS: u64 = 5;

/// Builder for platform server instances
pub struct PlatformBuilder {
    settings: Settings,
    sweeper: Option<JoinHandle<()>>,
}

impl PlatformBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            sweeper: None,
        }
    }

    /// Build a platform instance around the provided engine
    pub fn build(self, engine: Engine) -> Result<PlatformInstance> {
        let platform_grpc_server = PlatformServiceImpl::new(engine.clone()).into_server();
        let log_stream_grpc_server = LogStreamServiceImpl::new(engine.clone()).into_server();

        Ok(PlatformInstance {
            engine,
            platform_grpc_server,
            log_stream_grpc_server,
            settings: self.settings,
            sweeper: self.sweeper,
        })
    }

    /// Connect to PostgreSQL, run migrations and start the recent-log cache
    pub async fn create_engine(&mut self) -> Result<Engine> {
        let pool = create_pool(&self.settings)?;
        run_migrations(&pool).await?;

        let cache = Arc::new(InMemoryCache::new());
        let sweep_every = Duration::from_secs(self.settings.cache.sweep_interval_secs.max(1));
        self.sweeper = Some(cache.spawn_sweeper(sweep_every));

        let store = Arc::new(PgStore::new(pool));
        let engine = Engine::new(store, cache, &self.settings);
        log::info!("Platform engine initialized");
        Ok(engine)
    }
}

/// A fully initialized platform instance ready to serve requests
pub struct PlatformInstance {
    pub engine: Engine,
    pub platform_grpc_server: PlatformServiceServer<PlatformServiceImpl>,
    pub log_stream_grpc_server: LogStreamServiceServer<LogStreamServiceImpl>,
    pub settings: Settings,
    sweeper: Option<JoinHandle<()>>,
}

impl PlatformInstance {
    fn server(&self) -> Server {
        Server::builder()
            .http2_keepalive_interval(Some(Duration::from_secs(30)))
            .http2_keepalive_timeout(Some(Duration::from_secs(10)))
            .tcp_keepalive(Some(Duration::from_secs(30)))
    }

    /// Serve both services on the configured port until `shutdown_signal` resolves
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = format!("0.0.0.0:{}", self.settings.server.port).parse::<SocketAddr>()?;
        let listener = TcpListener::bind(addr).await?;

        log::info!("Bera platform listening on {addr}");
        self.serve_listener_with_shutdown(listener, shutdown_signal)
            .await
    }

    /// Serve on an already bound listener.
    ///
    /// When `shutdown_signal` resolves the engine goes first: running
    /// deployments are drained (bounded by the shutdown timeout) and every
    /// observer stream is closed. Only then does the server stop accepting and
    /// wait for its remaining connections, which no longer include streams.
    pub async fn serve_listener_with_shutdown<F>(
        self,
        listener: TcpListener,
        shutdown_signal: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let engine = self.engine.clone();
        let timeout_secs = self.settings.shutdown.timeout_secs;
        let engine_shutdown = async move {
            shutdown_signal.await;
            log::info!("Shutdown requested, shutting down engine...");
            if let Err(e) = engine.shutdown_with_timeout(timeout_secs).await {
                log::error!("Error during engine shutdown: {e}");
            }
            log::info!("Engine stopped, draining server connections...");
        };

        let result = self
            .server()
            .add_service(self.platform_grpc_server)
            .add_service(self.log_stream_grpc_server)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), engine_shutdown)
            .await;

        log::info!("Server terminated");
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }

        result?;
        Ok(())
    }

    /// Serve on an already bound listener in a spawned task until the watch fires
    pub fn serve_with_watch_shutdown(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<JoinHandle<Result<()>>> {
        let shutdown_future = async move {
            let mut rx = shutdown_rx;
            rx.changed().await.ok();
        };

        log::info!("Starting platform server on {}", listener.local_addr()?);
        let handle = tokio::spawn(self.serve_listener_with_shutdown(listener, shutdown_future));

        Ok(handle)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// A platform server running in the background
pub struct RunningPlatformInstance {
    pub engine: Engine,
    pub server_handle: JoinHandle<Result<()>>,
    pub shutdown_tx: watch::Sender<bool>,
    shutdown_timeout_secs: u64,
}

impl RunningPlatformInstance {
    pub fn from_listener(platform: PlatformInstance, listener: TcpListener) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = platform.engine.clone();
        let shutdown_timeout_secs = platform.settings.shutdown.timeout_secs;
        let server_handle = platform.serve_with_watch_shutdown(listener, shutdown_rx)?;

        Ok(Self {
            engine,
            server_handle,
            shutdown_tx,
            shutdown_timeout_secs,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Signal the server and wait for it to drain deployments, close observer
    /// streams and stop
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let limit = Duration::from_secs(self.shutdown_timeout_secs + SERVER_DRAIN_GRACE_SECS);
        match tokio::time::timeout(limit, self.server_handle).await {
            Ok(joined) => joined??,
            Err(_) => anyhow::bail!("platform server did not stop within {limit:?}"),
        }
        Ok(())
    }
}
