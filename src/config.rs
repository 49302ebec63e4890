use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Database pool settings.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 128))]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds; this is also the upper bound on
    /// how long a writer waits on a contended pool before the operation
    /// surfaces as retryable contention.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_acquire_timeout_secs() -> u64 {
    8
}
fn default_idle_timeout_secs() -> u64 {
    600
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Application environment ("development", "test", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging).
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup.
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default)]
    #[validate]
    pub database: DatabaseSettings,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl AppConfig {
    /// Loads configuration from layered files (`config/default.toml`, then
    /// `config/{environment}.toml`) and `STOCKLEDGER_`-prefixed environment
    /// variables, the later layers overriding the earlier.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKLEDGER_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder()
            .set_default("environment", environment.clone())?;

        let default_path = Path::new(CONFIG_DIR).join("default.toml");
        if default_path.exists() {
            builder = builder.add_source(File::from(default_path));
        }
        let env_path = Path::new(CONFIG_DIR).join(format!("{}.toml", environment));
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }

        builder = builder.add_source(
            Environment::with_prefix("STOCKLEDGER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!(
            environment = %config.environment,
            auto_migrate = config.auto_migrate,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Minimal constructor for tests and embedded use.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: environment.into(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: true,
            database: DatabaseSettings::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
