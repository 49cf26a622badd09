use anyhow::Result;
use tokio::signal;

use bera::platform::db::Settings;
use bera::platform::startup::PlatformBuilder;

/// Wait for shutdown signal (CTRL+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received CTRL+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    env_logger::init();

    let settings = Settings::new()?;
    log::info!(
        "Loaded settings: port={} deploy={:?} cache={:?}",
        settings.server.port,
        settings.deploy,
        settings.cache
    );

    let mut builder = PlatformBuilder::new(settings);
    let engine = builder.create_engine().await?;
    let platform = builder.build(engine)?;

    platform.serve_with_shutdown(shutdown_signal()).await?;

    Ok(())
}
