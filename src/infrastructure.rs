//! Infrastructure layer: configuration, logging, SQLite storage and the
//! marketplace client behind the engine's collaborator traits.

pub mod config; // Layered configuration (defaults, JSON file, environment)
pub mod database_connection;
pub mod listing_repository;
pub mod logging;
pub mod trading_client; // eBay Trading EndItems

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, ConfigManager, DatabaseConfig, LoggingConfig, TradingApiConfig};
pub use database_connection::DatabaseConnection;
pub use listing_repository::SqliteListingRepository;
pub use logging::init_logging_with_config;
pub use trading_client::{StaticTokenProvider, TokenProvider, TradingApiClient};
