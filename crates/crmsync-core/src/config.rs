//! Configuration module
//!
//! Environment-driven configuration for the sync orchestrator (API-side process and CLI)
//! and for the organization-assignment event consumer. Values are read once at startup;
//! a `.env` file is honoured when present.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::constants::{
    ASSIGNMENT_BATCH_SIZE, ASSIGNMENT_BLOCK_MS, ASSIGNMENT_CONSUMER_GROUP, ASSIGNMENT_STREAM_KEY,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

// Common constants
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const WRAPPER_TIMEOUT_SECS: u64 = 30;
const SYNC_LOCK_TTL_SECS: u64 = 600;
const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1_000;
const RETRY_MULTIPLIER: f64 = 2.0;
const RETRY_MAX_DELAY_MS: u64 = 10_000;
const RETRY_JITTER_MS: u64 = 1_000;
const CONSUMER_ERROR_BACKOFF_SECS: u64 = 5;
const CONSUMER_ORG_RETRY_DELAY_MS: u64 = 1_000;

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {}: {}", key, e)),
        _ => Ok(default),
    }
}

fn required(key: &str) -> Result<String, anyhow::Error> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

/// Settings shared by every process: database pool and runtime environment
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    /// `text` or `json`
    pub log_format: String,
}

impl BaseConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database_url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL must not be empty"));
        }
        if self.db_max_connections == 0 {
            return Err(anyhow!("DB_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }
}

/// Exponential backoff parameters of the retry controller
#[derive(Clone, Debug, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay_ms: RETRY_BASE_DELAY_MS,
            multiplier: RETRY_MULTIPLIER,
            max_delay_ms: RETRY_MAX_DELAY_MS,
            jitter_ms: RETRY_JITTER_MS,
        }
    }
}

impl RetrySettings {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Self {
            max_attempts: env_or("SYNC_RETRY_MAX_ATTEMPTS", RETRY_MAX_ATTEMPTS)?,
            base_delay_ms: env_or("SYNC_RETRY_BASE_DELAY_MS", RETRY_BASE_DELAY_MS)?,
            multiplier: env_or("SYNC_RETRY_MULTIPLIER", RETRY_MULTIPLIER)?,
            max_delay_ms: env_or("SYNC_RETRY_MAX_DELAY_MS", RETRY_MAX_DELAY_MS)?,
            jitter_ms: env_or("SYNC_RETRY_JITTER_MS", RETRY_JITTER_MS)?,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_attempts == 0 {
            return Err(anyhow!("SYNC_RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(anyhow!("SYNC_RETRY_MULTIPLIER must be >= 1.0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow!(
                "SYNC_RETRY_MAX_DELAY_MS must not be lower than SYNC_RETRY_BASE_DELAY_MS"
            ));
        }
        Ok(())
    }
}

/// Configuration of the tenant sync orchestrator
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub base: BaseConfig,
    pub wrapper_api_url: String,
    pub wrapper_timeout_secs: u64,
    pub wrapper_page_size: u32,
    pub lock_ttl_secs: u64,
    pub retry: RetrySettings,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let page_size: u32 = env_or("WRAPPER_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;

        let config = Self {
            base: BaseConfig::from_env()?,
            wrapper_api_url: required("WRAPPER_API_URL")?,
            wrapper_timeout_secs: env_or("WRAPPER_TIMEOUT_SECS", WRAPPER_TIMEOUT_SECS)?,
            wrapper_page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            lock_ttl_secs: env_or("SYNC_LOCK_TTL_SECS", SYNC_LOCK_TTL_SECS)?,
            retry: RetrySettings::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.base.validate()?;
        self.retry.validate()?;
        if self.wrapper_api_url.trim().is_empty() {
            return Err(anyhow!("WRAPPER_API_URL must not be empty"));
        }
        if self.lock_ttl_secs == 0 {
            return Err(anyhow!("SYNC_LOCK_TTL_SECS must be greater than 0"));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn wrapper_timeout(&self) -> Duration {
        Duration::from_secs(self.wrapper_timeout_secs)
    }
}

/// Configuration of the organization-assignment stream consumer
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub base: BaseConfig,
    pub redis_url: String,
    pub stream_key: String,
    pub group_name: String,
    pub consumer_name: String,
    pub block_ms: u64,
    pub batch_size: usize,
    pub error_backoff_secs: u64,
    pub org_retry_delay_ms: u64,
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Self {
            base: BaseConfig::from_env()?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            stream_key: env::var("ASSIGNMENT_STREAM_KEY")
                .unwrap_or_else(|_| ASSIGNMENT_STREAM_KEY.to_string()),
            group_name: env::var("ASSIGNMENT_CONSUMER_GROUP")
                .unwrap_or_else(|_| ASSIGNMENT_CONSUMER_GROUP.to_string()),
            consumer_name: env::var("ASSIGNMENT_CONSUMER_NAME")
                .unwrap_or_else(|_| default_consumer_name()),
            block_ms: env_or("ASSIGNMENT_BLOCK_MS", ASSIGNMENT_BLOCK_MS)?,
            batch_size: env_or("ASSIGNMENT_BATCH_SIZE", ASSIGNMENT_BATCH_SIZE)?,
            error_backoff_secs: env_or(
                "ASSIGNMENT_ERROR_BACKOFF_SECS",
                CONSUMER_ERROR_BACKOFF_SECS,
            )?,
            org_retry_delay_ms: env_or(
                "ASSIGNMENT_ORG_RETRY_DELAY_MS",
                CONSUMER_ORG_RETRY_DELAY_MS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.base.validate()?;
        if self.redis_url.trim().is_empty() {
            return Err(anyhow!("REDIS_URL must not be empty"));
        }
        if self.stream_key.trim().is_empty() || self.group_name.trim().is_empty() {
            return Err(anyhow!("Stream key and consumer group must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("ASSIGNMENT_BATCH_SIZE must be greater than 0"));
        }
        Ok(())
    }
}

/// `consumer-<hostname>-<pid>`, stable for the lifetime of the process.
pub fn default_consumer_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("consumer-{}-{}", host, std::process::id())
}
