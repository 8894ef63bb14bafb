use serde::Deserialize;
use std::net::SocketAddr;

use domain::models::EndpointPolicy;
use domain::services::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub webhooks: WebhooksConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(cfg: &DatabaseConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            max_connections: cfg.max_connections,
            min_connections: cfg.min_connections,
            connect_timeout_secs: cfg.connect_timeout_secs,
            idle_timeout_secs: cfg.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Where endpoints, deliveries and attempts live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process memory; for local development only.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Delivery pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhooksConfig {
    /// Accept `http://` endpoint URLs (dev/test mode).
    #[serde(default)]
    pub allow_insecure_urls: bool,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: i32,

    #[serde(default = "default_max_retries_limit")]
    pub max_retries_limit: i32,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: i32,

    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: i32,

    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: i32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    #[serde(default = "default_retry_jitter_ratio")]
    pub retry_jitter_ratio: f64,

    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    #[serde(default = "default_scheduler_batch_size")]
    pub scheduler_batch_size: i64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Bodies larger than this are an `invalid_response`.
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit_bytes: usize,

    /// Response bodies are truncated to this size before storage.
    #[serde(default = "default_stored_body_limit")]
    pub stored_body_limit_bytes: usize,

    /// Attempt new deliveries as soon as they are enqueued.
    #[serde(default = "default_immediate_dispatch")]
    pub immediate_dispatch: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl WebhooksConfig {
    pub fn endpoint_policy(&self) -> EndpointPolicy {
        EndpointPolicy {
            allow_insecure_urls: self.allow_insecure_urls,
            default_max_retries: self.default_max_retries,
            max_retries_limit: self.max_retries_limit,
            default_timeout_ms: self.default_timeout_ms,
            min_timeout_ms: self.min_timeout_ms,
            max_timeout_ms: self.max_timeout_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_base_delay_secs,
            self.retry_max_delay_secs,
            self.retry_jitter_ratio,
        )
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_secs as i64)
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_max_retries() -> i32 {
    5
}
fn default_max_retries_limit() -> i32 {
    10
}
fn default_timeout_ms() -> i32 {
    10_000
}
fn default_min_timeout_ms() -> i32 {
    1_000
}
fn default_max_timeout_ms() -> i32 {
    30_000
}
fn default_retry_base_delay() -> u64 {
    30
}
fn default_retry_max_delay() -> u64 {
    3600
}
fn default_retry_jitter_ratio() -> f64 {
    0.2
}
fn default_scheduler_interval() -> u64 {
    30
}
fn default_scheduler_batch_size() -> i64 {
    100
}
fn default_worker_concurrency() -> usize {
    8
}
fn default_lease_secs() -> u64 {
    120
}
fn default_response_body_limit() -> usize {
    65_536
}
fn default_stored_body_limit() -> usize {
    4096
}
fn default_immediate_dispatch() -> bool {
    true
}
fn default_user_agent() -> String {
    concat!("storefront-webhooks/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Built-in defaults, used when no config file is present.
const DEFAULTS_TOML: &str = r#"
    [server]
    host = "0.0.0.0"
    port = 8080
    request_timeout_secs = 60

    [database]
    url = ""
    max_connections = 20
    min_connections = 5
    connect_timeout_secs = 10
    idle_timeout_secs = 600

    [logging]
    level = "info"
    format = "json"

    [storage]
    backend = "postgres"

    [webhooks]
    allow_insecure_urls = false
"#;

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with WH__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULTS_TOML, config::FileFormat::Toml))
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("WH").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration from built-in defaults plus explicit overrides,
    /// without touching config files or the environment. Not validated.
    pub fn load_with_overrides(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULTS_TOML, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "WH__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        let w = &self.webhooks;
        if w.min_timeout_ms <= 0 || w.min_timeout_ms > w.max_timeout_ms {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.min_timeout_ms must be positive and not exceed max_timeout_ms".to_string(),
            ));
        }

        if !(w.min_timeout_ms..=w.max_timeout_ms).contains(&w.default_timeout_ms) {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.default_timeout_ms must lie within the timeout bounds".to_string(),
            ));
        }

        if w.max_retries_limit < 0 || !(0..=w.max_retries_limit).contains(&w.default_max_retries) {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.default_max_retries must lie within 0..=max_retries_limit".to_string(),
            ));
        }

        // A lease must outlive the slowest possible attempt.
        if (w.lease_secs as i64) * 1000 <= w.max_timeout_ms as i64 {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.lease_secs must exceed max_timeout_ms".to_string(),
            ));
        }

        // Manual retries and test sends run the outbound call inside the request.
        if (self.server.request_timeout_secs as i64) * 1000 <= w.max_timeout_ms as i64 {
            return Err(ConfigValidationError::InvalidValue(
                "server.request_timeout_secs must exceed webhooks.max_timeout_ms".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&w.retry_jitter_ratio) {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.retry_jitter_ratio must be in [0, 1)".to_string(),
            ));
        }

        if w.retry_base_delay_secs == 0 || w.retry_base_delay_secs > w.retry_max_delay_secs {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks.retry_base_delay_secs must be positive and not exceed retry_max_delay_secs"
                    .to_string(),
            ));
        }

        if w.scheduler_interval_secs == 0 || w.scheduler_batch_size <= 0 || w.worker_concurrency == 0
        {
            return Err(ConfigValidationError::InvalidValue(
                "webhooks scheduler interval, batch size and concurrency must be positive"
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
