use crate::domain::Address;
use crate::pagination::RetryPolicy;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rpc_url: String,
    pub deployment_registry: Address,
    pub page_size: u64,
    pub fetch_retry_budget: u32,
    pub fetch_timeout_ms: u64,
    pub query_concurrency: usize,
    pub ingest_queue_depth: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = required(&env_map, "DATABASE_PATH")?;
        let rpc_url = required(&env_map, "RPC_URL")?;

        let deployment_registry = required(&env_map, "DEPLOYMENT_REGISTRY")?;
        let deployment_registry = Address::from_str(deployment_registry.trim()).map_err(|e| {
            ConfigError::InvalidValue("DEPLOYMENT_REGISTRY".to_string(), e.to_string())
        })?;

        let page_size = positive(parse_or(&env_map, "PAGE_SIZE", 1000u64, "must be a valid u64")?, "PAGE_SIZE")?;
        // Sentinel pages request one record past the page size.
        if page_size == u64::MAX {
            return Err(ConfigError::InvalidValue(
                "PAGE_SIZE".to_string(),
                format!("must be below {}", u64::MAX),
            ));
        }
        let fetch_retry_budget = positive(
            parse_or(&env_map, "FETCH_RETRY_BUDGET", 3u32, "must be a valid u32")?,
            "FETCH_RETRY_BUDGET",
        )?;
        let fetch_timeout_ms = parse_or(&env_map, "FETCH_TIMEOUT_MS", 10_000u64, "must be a valid u64")?;
        let query_concurrency = positive(
            parse_or(&env_map, "QUERY_CONCURRENCY", 4usize, "must be a valid usize")?,
            "QUERY_CONCURRENCY",
        )?;
        let ingest_queue_depth = positive(
            parse_or(&env_map, "INGEST_QUEUE_DEPTH", 1024usize, "must be a valid usize")?,
            "INGEST_QUEUE_DEPTH",
        )?;

        Ok(Config {
            port,
            database_path,
            rpc_url,
            deployment_registry,
            page_size,
            fetch_retry_budget,
            fetch_timeout_ms,
            query_concurrency,
            ingest_queue_depth,
        })
    }

    /// Per-page retry policy for every `fetch_all` issued by the read side.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_retry_budget,
            timeout: Duration::from_millis(self.fetch_timeout_ms),
            ..RetryPolicy::default()
        }
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
    }
}

fn positive<T: PartialEq + Default>(value: T, key: &str) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}
