use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_TAX_RATE: f64 = 0.075;
const DEFAULT_CART_ABANDON_HOURS: i64 = 24;
const DEFAULT_CANCEL_WINDOW_DAYS: i64 = 3;
const DEFAULT_RECOVERY_MATCH_WINDOW_HOURS: i64 = 24;

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Fallback currency for stores without an explicit configuration
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Flat tax rate applied to the cart subtotal (store/region config)
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_tax_rate")]
    pub default_tax_rate: f64,

    /// Hours of inactivity before a cart with items is declared abandoned
    #[serde(default = "default_cart_abandon_hours")]
    pub cart_abandon_hours: i64,

    /// Days after creation during which a pending order may be cancelled
    #[serde(default = "default_cancel_window_days")]
    pub order_cancel_window_days: i64,

    /// Window for the best-effort user/recency abandoned-cart recovery match
    #[serde(default = "default_recovery_match_window_hours")]
    pub recovery_match_window_hours: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}
fn default_cart_abandon_hours() -> i64 {
    DEFAULT_CART_ABANDON_HOURS
}
fn default_cancel_window_days() -> i64 {
    DEFAULT_CANCEL_WINDOW_DAYS
}
fn default_recovery_match_window_hours() -> i64 {
    DEFAULT_RECOVERY_MATCH_WINDOW_HOURS
}

impl AppConfig {
    /// Loads configuration from layered files (`config/default.toml`, then
    /// `config/{environment}.toml`) with `APP_`-prefixed environment
    /// variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder();
        let default_path = Path::new(CONFIG_DIR).join("default.toml");
        if default_path.exists() {
            builder = builder.add_source(File::from(default_path));
        }
        let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }
        let config: AppConfig = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        config
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(config)
    }

    /// Minimal constructor used by tests and embedding callers.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            default_currency: default_currency(),
            default_tax_rate: default_tax_rate(),
            cart_abandon_hours: default_cart_abandon_hours(),
            order_cancel_window_days: default_cancel_window_days(),
            recovery_match_window_hours: default_recovery_match_window_hours(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Initialises the global tracing subscriber from the configured level and
/// format. Safe to call once at startup.
pub fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
