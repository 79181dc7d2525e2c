//! Configuration infrastructure
//!
//! Configuration is layered:
//! 1. built-in defaults (`defaults` module)
//! 2. optional JSON file (`ConfigManager` resolves the path)
//! 3. `REAPER__<SECTION>__<KEY>` environment variables

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::sync_engine::config::EngineConfig;

pub const APP_DIR_NAME: &str = "listing-reaper";
pub const ENV_PREFIX: &str = "REAPER";
pub const CONFIG_PATH_ENV: &str = "REAPER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Default values for everything outside the engine section
pub mod defaults {
    pub const DATABASE_URL: &str = "sqlite:data/listings.db";
    pub const DATABASE_MAX_CONNECTIONS: u32 = 5;
    /// Listings become candidates once they are this many calendar days old
    pub const MIN_AGE_DAYS: u32 = 30;

    pub const TRADING_ENDPOINT: &str = "https://api.ebay.com/ws/api.dll";
    pub const TRADING_SITE_ID: &str = "0";
    pub const TRADING_COMPATIBILITY_LEVEL: &str = "1175";
    pub const TRADING_ENDING_REASON: &str = "NotAvailable";
    pub const TRADING_TIMEOUT_SECONDS: u64 = 30;
    pub const TRADING_MAX_REQUESTS_PER_SECOND: u32 = 2;
    pub const TRADING_MAX_ITEMS_PER_CALL: usize = 10;
    pub const USER_AGENT: &str = "listing-reaper/0.1";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "listing-reaper.log";
    pub const LOG_MAX_FILES: u32 = 10;
    /// KST
    pub const LOG_UTC_OFFSET_HOURS: i32 = 9;
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub trading: TradingApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_age_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::DATABASE_URL.to_string(),
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
            min_age_days: defaults::MIN_AGE_DAYS,
        }
    }
}

/// eBay Trading API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingApiConfig {
    pub endpoint: String,
    pub site_id: String,
    pub compatibility_level: String,
    /// `EndingReason` sent for every listing
    pub ending_reason: String,
    pub timeout_seconds: u64,
    /// HTTP level request quota, independent of the engine pacing
    pub max_requests_per_second: u32,
    pub max_items_per_call: usize,
    pub user_agent: String,
    /// account -> OAuth user token
    pub tokens: HashMap<String, String>,
}

impl Default for TradingApiConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::TRADING_ENDPOINT.to_string(),
            site_id: defaults::TRADING_SITE_ID.to_string(),
            compatibility_level: defaults::TRADING_COMPATIBILITY_LEVEL.to_string(),
            ending_reason: defaults::TRADING_ENDING_REASON.to_string(),
            timeout_seconds: defaults::TRADING_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::TRADING_MAX_REQUESTS_PER_SECOND,
            max_items_per_call: defaults::TRADING_MAX_ITEMS_PER_CALL,
            user_agent: defaults::USER_AGENT.to_string(),
            tokens: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// JSON formatted file logs
    pub json_format: bool,

    /// Console output goes to stderr
    pub console_output: bool,

    pub file_output: bool,

    /// Defaults to `<data dir>/listing-reaper/logs`
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    pub auto_cleanup_logs: bool,

    /// Offset of the timestamps written by both layers
    pub utc_offset_hours: i32,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: true,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            utc_offset_hours: defaults::LOG_UTC_OFFSET_HOURS,
            module_filters: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the file at `path` (if it exists), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Validation { message });

        if let Err(e) = self.engine.validate() {
            return invalid(e.to_string());
        }
        if self.engine.remote_batch_limit > self.trading.max_items_per_call {
            return invalid(format!(
                "engine.remote_batch_limit ({}) exceeds trading.max_items_per_call ({})",
                self.engine.remote_batch_limit, self.trading.max_items_per_call
            ));
        }
        if self.trading.max_requests_per_second == 0 {
            return invalid("trading.max_requests_per_second must be greater than 0".to_string());
        }
        if self.trading.timeout_seconds == 0 {
            return invalid("trading.timeout_seconds must be greater than 0".to_string());
        }
        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than 0".to_string());
        }
        if !(-12..=14).contains(&self.logging.utc_offset_hours) {
            return invalid(format!("logging.utc_offset_hours out of range: {}", self.logging.utc_offset_hours));
        }

        Ok(())
    }
}

/// Resolves where the configuration and runtime data live
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(APP_DIR_NAME);

        Ok(config_dir)
    }

    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(APP_DIR_NAME);

        Ok(data_dir)
    }

    /// `$REAPER_CONFIG` wins over the per-user config directory.
    pub fn new() -> Result<Self> {
        let config_path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::get_config_dir()?.join("config.json"),
        };

        Ok(Self { config_path })
    }

    pub const fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn load(&self) -> Result<AppConfig> {
        let config = AppConfig::load(Some(&self.config_path))
            .with_context(|| format!("Failed to load configuration from {:?}", self.config_path))?;
        info!("⚙️ Configuration loaded (file: {:?}, exists: {})", self.config_path, self.config_path.exists());
        Ok(config)
    }

    /// Writes the default configuration when no file exists yet.
    pub async fn initialize_on_first_run(&self) -> Result<bool> {
        if self.config_path.exists() {
            return Ok(false);
        }

        if let Some(config_dir) = self.config_path.parent() {
            fs::create_dir_all(config_dir)
                .await
                .context("Failed to create config directory")?;
        }
        self.save_config(&AppConfig::default()).await?;
        info!("🎉 First run detected - wrote default configuration to {:?}", self.config_path);
        Ok(true)
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .with_context(|| format!("Failed to write configuration file: {:?}", self.config_path))?;
        Ok(())
    }
}
