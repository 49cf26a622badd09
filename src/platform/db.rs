use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use serde::Deserialize;
use tokio_postgres::NoTls;

pub type PgPool = Pool;

mod embedded {
    refinery::embed_migrations!("migrations");
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub url: String,
    pub pool_size: usize,
    /// Hosted databases terminate TLS with certificates we do not pin.
    #[serde(default)]
    pub ssl: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Frames buffered per observer before it is treated as not ready
    pub observer_buffer: usize,
    pub keepalive_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            observer_buffer: 256,
            keepalive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub recent_log_limit: usize,
    pub recent_log_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recent_log_limit: crate::RECENT_LOG_LIMIT,
            recent_log_ttl_secs: crate::RECENT_LOG_TTL_SECS,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    pub step_delay_ms: u64,
    pub public_url_base: String,
    pub default_branch: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 800,
            public_url_base: "https://berahost.up.railway.app".to_string(),
            default_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseConfig {
    /// Insert attempts before a version conflict is reported to the caller
    pub max_attempts: u32,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Connection strings handed to applications when the matching add-on is attached.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddonsConfig {
    pub postgres_url: Option<String>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: Database,
    pub server: Server,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub releases: ReleaseConfig,
    #[serde(default)]
    pub addons: AddonsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Settings {
    /// Load settings: `BERA_*` environment variables > `config/server.toml` > defaults
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("config/server")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server.port", 52810)?
            .set_default("database.pool_size", 16)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("BERA").separator("__"))
            .build()?
            .try_deserialize()
    }
}

pub fn create_pool(settings: &Settings) -> Result<PgPool> {
    let pg_config: tokio_postgres::Config = settings.database.url.parse()?;
    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = if settings.database.ssl {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_verify(SslVerifyMode::NONE);
        let tls = MakeTlsConnector::new(builder.build());
        Manager::from_config(pg_config, tls, manager_config)
    } else {
        Manager::from_config(pg_config, NoTls, manager_config)
    };

    let pool = Pool::builder(manager)
        .max_size(settings.database.pool_size)
        .build()?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut client = pool.get().await?;
    let report = embedded::migrations::runner()
        .run_async(&mut **client)
        .await?;
    log::info!(
        "Applied {} database migrations",
        report.applied_migrations().len()
    );
    Ok(())
}
