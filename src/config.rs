use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub dispatch_queue_size: usize,
    pub search_radius_km: f64,
    pub max_assignment_attempts: u32,
    pub lock_ttl_ms: u64,
    pub contention_retry_limit: u32,
    pub contention_backoff_ms: u64,
    pub contention_backoff_max_ms: u64,
    pub ride_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub redis_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            dispatch_queue_size: 1024,
            search_radius_km: 5.0,
            max_assignment_attempts: 3,
            lock_ttl_ms: 10_000,
            contention_retry_limit: 5,
            contention_backoff_ms: 50,
            contention_backoff_max_ms: 1_000,
            ride_timeout_secs: 300,
            sweep_interval_secs: 30,
            redis_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", defaults.search_radius_km)?,
            max_assignment_attempts: parse_or_default(
                "MAX_ASSIGNMENT_ATTEMPTS",
                defaults.max_assignment_attempts,
            )?,
            lock_ttl_ms: parse_or_default("LOCK_TTL_MS", defaults.lock_ttl_ms)?,
            contention_retry_limit: parse_or_default(
                "CONTENTION_RETRY_LIMIT",
                defaults.contention_retry_limit,
            )?,
            contention_backoff_ms: parse_or_default(
                "CONTENTION_BACKOFF_MS",
                defaults.contention_backoff_ms,
            )?,
            contention_backoff_max_ms: parse_or_default(
                "CONTENTION_BACKOFF_MAX_MS",
                defaults.contention_backoff_max_ms,
            )?,
            ride_timeout_secs: parse_or_default("RIDE_TIMEOUT_SECS", defaults.ride_timeout_secs)?,
            sweep_interval_secs: parse_or_default(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
        };

        if config.sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "invalid SWEEP_INTERVAL_SECS: must be > 0".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn ride_timeout(&self) -> Duration {
        Duration::from_secs(self.ride_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
