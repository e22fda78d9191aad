//! Configuration module
//!
//! Settings are read from the environment (and `.env` through `dotenvy`) once at
//! startup, then checked with [`Config::validate`].

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_API_PREFIX;
use crate::role::ClusterRole;

const SERVER_PORT: u16 = 8102;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const WORKER_REQUEST_TIMEOUT_SECS: u64 = 300;
const WORKER_CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_UPLOAD_SIZE_MB: usize = 512;
const BYTES_PER_MB: usize = 1024 * 1024;
const MIN_JWT_SECRET_LEN: usize = 32;

/// Policy used to pick a worker for new files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Always the worker reporting the most available space
    Static,
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::Static => f.write_str("static"),
        }
    }
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(SchedulingStrategy::Static),
            other => Err(format!("unknown scheduling strategy '{}'", other)),
        }
    }
}

/// Settings every Cairn process needs regardless of role
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub log_format: String,
    pub jwt_secret: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

/// Master node configuration
#[derive(Clone, Debug)]
pub struct MasterConfig {
    pub base: BaseConfig,
    pub role: ClusterRole,
    pub scheduling_strategy: SchedulingStrategy,
    /// `None` selects the in-memory store
    pub database_url: Option<String>,
    pub worker_api_prefix: String,
    pub worker_request_timeout_secs: u64,
    pub worker_connect_timeout_secs: u64,
    pub max_upload_size_mb: usize,
    /// 0 disables the retention sweeper
    pub retention_sweep_interval_secs: u64,
    pub retention_min_available_space_bytes: i64,
}

/// Application configuration (master node).
#[derive(Clone, Debug)]
pub struct Config(pub Box<MasterConfig>);

impl Config {
    fn as_master(&self) -> &MasterConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = MasterConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_master().validate()
    }

    pub fn is_production(&self) -> bool {
        self.as_master().is_production()
    }

    pub fn server_port(&self) -> u16 {
        self.as_master().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.as_master().base.environment
    }

    pub fn log_format(&self) -> &str {
        &self.as_master().base.log_format
    }

    pub fn jwt_secret(&self) -> &str {
        &self.as_master().base.jwt_secret
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_master().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_master().base.db_timeout_seconds
    }

    pub fn role(&self) -> ClusterRole {
        self.as_master().role
    }

    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        self.as_master().scheduling_strategy
    }

    pub fn database_url(&self) -> Option<&str> {
        self.as_master().database_url.as_deref()
    }

    pub fn worker_api_prefix(&self) -> &str {
        &self.as_master().worker_api_prefix
    }

    pub fn worker_request_timeout(&self) -> Duration {
        Duration::from_secs(self.as_master().worker_request_timeout_secs)
    }

    pub fn worker_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.as_master().worker_connect_timeout_secs)
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.as_master().max_upload_size_bytes()
    }

    /// `None` when the sweeper is disabled
    pub fn retention_sweep_interval(&self) -> Option<Duration> {
        match self.as_master().retention_sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retention_min_available_space_bytes(&self) -> i64 {
        self.as_master().retention_min_available_space_bytes
    }
}

impl MasterConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set for authentication"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
        };

        let role = env::var("CLUSTER_ROLE")
            .unwrap_or_else(|_| "master".to_string())
            .parse::<ClusterRole>()
            .map_err(|e| anyhow::anyhow!("CLUSTER_ROLE: {}", e))?;

        let scheduling_strategy = env::var("SCHEDULING_STRATEGY")
            .unwrap_or_else(|_| "static".to_string())
            .parse::<SchedulingStrategy>()
            .map_err(|e| anyhow::anyhow!("SCHEDULING_STRATEGY: {}", e))?;

        let max_upload_size_mb = env::var("MAX_UPLOAD_SIZE_MB")
            .unwrap_or_else(|_| MAX_UPLOAD_SIZE_MB.to_string())
            .parse::<usize>()
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        Ok(MasterConfig {
            base,
            role,
            scheduling_strategy,
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            worker_api_prefix: env::var("WORKER_API_PREFIX")
                .unwrap_or_else(|_| DEFAULT_API_PREFIX.to_string()),
            worker_request_timeout_secs: env::var("WORKER_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(WORKER_REQUEST_TIMEOUT_SECS),
            worker_connect_timeout_secs: env::var("WORKER_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(WORKER_CONNECT_TIMEOUT_SECS),
            max_upload_size_mb,
            retention_sweep_interval_secs: env::var("RETENTION_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            retention_min_available_space_bytes: env::var("RETENTION_MIN_AVAILABLE_SPACE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.base.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    /// Body limit for uploads. Saturates; `validate` rejects sizes that overflow.
    pub fn max_upload_size_bytes(&self) -> usize {
        self.max_upload_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.base.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least {} characters long",
                MIN_JWT_SECRET_LEN
            ));
        }

        match &self.database_url {
            Some(url) if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) => {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
            None if self.is_production() => {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be set in production; the in-memory store is for development only"
                ));
            }
            _ => {}
        }

        if !self.worker_api_prefix.starts_with('/') {
            return Err(anyhow::anyhow!("WORKER_API_PREFIX must start with '/'"));
        }

        if self.worker_request_timeout_secs == 0 || self.worker_connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_REQUEST_TIMEOUT_SECS and WORKER_CONNECT_TIMEOUT_SECS must be positive"
            ));
        }

        match self.max_upload_size_mb.checked_mul(BYTES_PER_MB) {
            Some(bytes) if bytes > 0 => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "MAX_UPLOAD_SIZE_MB must be between 1 and {}",
                    usize::MAX / BYTES_PER_MB
                ));
            }
        }

        if self.retention_sweep_interval_secs > 0 && self.retention_min_available_space_bytes <= 0
        {
            return Err(anyhow::anyhow!(
                "RETENTION_MIN_AVAILABLE_SPACE_BYTES must be positive when the retention sweeper is enabled"
            ));
        }

        Ok(())
    }
}
