//! Configuration module
//!
//! Worker configuration is read from the environment with named defaults;
//! the daemon loads a `.env` file first via `dotenvy`.

use std::env;

use crate::error::AppError;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_RETRIES: i32 = 3;
const DEFAULT_TASK_TIMEOUT_SECONDS: i32 = 60;
const DEFAULT_STALE_TASK_REAP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STALE_TASK_GRACE_PERIOD_SECS: i64 = 300;
const DEFAULT_FINISHED_TASK_RETENTION_DAYS: i32 = 30;

/// Allocation worker configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Queue-level failure retry budget; domain reschedules are not counted.
    pub max_retries: i32,
    pub default_timeout_seconds: i32,
    pub stale_task_reap_interval_secs: u64,
    pub stale_task_grace_period_secs: i64,
    /// Finished tasks older than this are deleted by the maintenance loop.
    pub finished_task_retention_days: i32,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::InvalidInput("DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            database_url,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            max_workers: parse_env("TASK_QUEUE_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            poll_interval_ms: parse_env("TASK_QUEUE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            max_retries: parse_env("TASK_QUEUE_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            default_timeout_seconds: parse_env(
                "TASK_TIMEOUT_SECONDS",
                DEFAULT_TASK_TIMEOUT_SECONDS,
            )?,
            stale_task_reap_interval_secs: parse_env(
                "STALE_TASK_REAP_INTERVAL_SECS",
                DEFAULT_STALE_TASK_REAP_INTERVAL_SECS,
            )?,
            stale_task_grace_period_secs: parse_env(
                "STALE_TASK_GRACE_PERIOD_SECS",
                DEFAULT_STALE_TASK_GRACE_PERIOD_SECS,
            )?,
            finished_task_retention_days: parse_env(
                "FINISHED_TASK_RETENTION_DAYS",
                DEFAULT_FINISHED_TASK_RETENTION_DAYS,
            )?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default() {
        let value: u64 = parse_env("LEADLINE_TEST_UNSET_VAR", 17).unwrap();
        assert_eq!(value, 17);
    }

    #[test]
    fn parse_env_reads_set_value() {
        env::set_var("LEADLINE_TEST_SET_VAR", "250");
        let value: u64 = parse_env("LEADLINE_TEST_SET_VAR", 17).unwrap();
        assert_eq!(value, 250);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        env::set_var("LEADLINE_TEST_BAD_VAR", "not-a-number");
        let result: Result<u64, _> = parse_env("LEADLINE_TEST_BAD_VAR", 17);
        assert!(result.is_err());
    }
}
