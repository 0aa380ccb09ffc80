use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// SQLite database file. Parent directories are created on start-up.
    pub database_path: PathBuf,
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
    /// Deadline applied to every HTTP request.
    pub request_timeout: Duration,
    /// Fixed seed for reviewer selection. Random when unset.
    pub reviewer_seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = var("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let database_path = var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("review-assigner.db"));

        let log_level = var("LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase();
        if !matches!(
            log_level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            bail!("LOG_LEVEL must be one of error, warn, info, debug, trace");
        }

        let timeout_secs = var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "10".to_string())
            .parse::<u64>()
            .context("REQUEST_TIMEOUT_SECS must be a whole number of seconds")?;
        if timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }

        let reviewer_seed = var("REVIEWER_SEED")
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("REVIEWER_SEED must be an unsigned integer")?;

        Ok(Config {
            port,
            database_path,
            log_level,
            request_timeout: Duration::from_secs(timeout_secs),
            reviewer_seed,
        })
    }
}
