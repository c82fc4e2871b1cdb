//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Absent when running on the in-memory store
    pub database: Option<DatabaseConfig>,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub run_migrations: bool,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Bearer token settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_ttl_secs: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS", false)?;
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: if skip_externals {
                None
            } else {
                Some(DatabaseConfig::from_env()?)
            },
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if !self.skip_externals {
            self.cache.validate()?;
        }
        self.logging.validate()?;
        self.auth.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("SERVER_PORT", 8000)?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost,http://127.0.0.1".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            run_migrations: env_flag("RUN_MIGRATIONS", false)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env_opt("DB_IDLE_TIMEOUT")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_ttl: env_or("CACHE_DEFAULT_TTL", 3600)?,
            max_connections: env_or("CACHE_MAX_CONNECTIONS", 10)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        // Basic validation of Redis URL format
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            token_secret: env::var("AUTH_TOKEN_SECRET")
                .map_err(|_| ConfigError::MissingVariable("AUTH_TOKEN_SECRET".to_string()))?,
            token_ttl_secs: env_or("AUTH_TOKEN_TTL_SECS", 3600)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_secret.len() < 32 {
            return Err(ConfigError::ValidationFailed(
                "AUTH_TOKEN_SECRET must be at least 32 bytes".to_string(),
            ));
        }
        if self.token_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue("AUTH_TOKEN_TTL_SECS".to_string()));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

// ----------------------------------------------------------------------------
// Environment helpers shared by the per-service configs
// ----------------------------------------------------------------------------

/// Parses `key` if set, otherwise returns `default`.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        _ => Ok(default),
    }
}

pub fn env_opt<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        _ => Ok(None),
    }
}

pub fn env_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        Err(_) => Ok(default),
    }
}

pub fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
