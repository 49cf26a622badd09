use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use bera::platform::broadcaster::BroadcastMessage;
use bera::platform::store::LogEntry;
use bera::proto::platform::log_stream_service_client::LogStreamServiceClient;
use bera::proto::platform::platform_service_client::PlatformServiceClient;
use bera::proto::platform::{
    AppRequest, CreateAppRequest, DeployRequest, GetStatsRequest, ListAppsRequest, ObserverMsg,
};

const LIVE_MARKER: &str = "-----> App is live at ";

#[derive(Parser)]
#[command(name = "bera-cli")]
#[command(about = "Command-line client for the Bera platform server")]
struct Args {
    /// Platform server endpoint
    #[arg(long, default_value = "http://127.0.0.1:52810")]
    server: String,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List applications, newest first
    Apps,
    /// Create an application
    CreateApp {
        name: String,
        #[arg(long, default_value = "us")]
        region: String,
    },
    /// Start a deployment and return immediately
    Deploy {
        app_id: String,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Print the most recent log lines of an application
    Logs { app_id: String },
    /// Follow the live log stream of an application
    Tail {
        app_id: String,
        /// Exit once the deployment reports the application live
        #[arg(long)]
        until_live: bool,
        /// Print each frame as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deployment statistics
    Stats,
}

fn print_entry(entry: &LogEntry) {
    println!(
        "{} {}[{}]: {}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        entry.application_id,
        entry.source,
        entry.content
    );
}

async fn tail(endpoint: String, app_id: &str, until_live: bool, json: bool) -> Result<()> {
    let mut client = LogStreamServiceClient::connect(endpoint).await?;

    let heartbeats = IntervalStream::new(tokio::time::interval(Duration::from_secs(10))).map(|_| {
        ObserverMsg {
            timestamp: chrono::Utc::now().timestamp(),
        }
    });
    let mut frames = client.stream(heartbeats).await?.into_inner();

    while let Some(frame) = frames.next().await {
        let message = BroadcastMessage::try_from(frame?)?;
        let entry = match message {
            BroadcastMessage::Log(entry) if entry.application_id == app_id => entry,
            _ => continue,
        };

        if json {
            println!("{}", serde_json::to_string(&BroadcastMessage::Log(entry.clone()))?);
        } else {
            print_entry(&entry);
        }

        if until_live && entry.content.starts_with(LIVE_MARKER) {
            return Ok(());
        }
    }

    bail!("log stream closed by the server")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match args.command {
        Command::Tail {
            app_id,
            until_live,
            json,
        } => tail(args.server, &app_id, until_live, json).await,
        command => run(args.server, command).await,
    }
}

async fn run(server: String, command: Command) -> Result<()> {
    let mut client = PlatformServiceClient::connect(server.clone()).await?;
    log::info!("Connected to {server}");

    match command {
        Command::Apps => {
            let apps = client.list_apps(ListAppsRequest {}).await?.into_inner().apps;
            for app in apps {
                println!("{}\t{}\t{}\t{}", app.id, app.name, app.region, app.status);
            }
        }
        Command::CreateApp { name, region } => {
            let app = client
                .create_app(CreateAppRequest { name, region })
                .await?
                .into_inner();
            println!("Created {} ({})", app.name, app.id);
        }
        Command::Deploy { app_id, branch } => {
            let response = client
                .deploy(DeployRequest {
                    app_id: app_id.clone(),
                    branch,
                })
                .await?
                .into_inner();
            println!("Deployment of {app_id} {}", response.status);
        }
        Command::Logs { app_id } => {
            let response = client.get_logs(AppRequest { app_id }).await?.into_inner();
            log::info!("Served from cache: {}", response.from_cache);
            for data in response.logs {
                print_entry(&LogEntry::try_from(data)?);
            }
        }
        Command::Stats => {
            let stats = client.get_stats(GetStatsRequest {}).await?.into_inner();
            println!("Total deploys: {}", stats.total_deploys);
            for app_id in stats.recent_deploys {
                println!("  {app_id}");
            }
        }
        Command::Tail { .. } => {}
    }

    Ok(())
}
