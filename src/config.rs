//! Runtime configuration, loaded from the environment with `.env`
//! support for local development.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub heartbeat_ttl: Duration,
    pub worker_timeout: Duration,
    pub dispatch_grace: Duration,
    pub idle_poll_interval: Duration,
    pub error_backoff: Duration,
    pub per_job_estimate: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:8080")?
                .parse()
                .context("LISTEN_ADDR must be a valid socket address")?,
            heartbeat_ttl: Duration::from_secs(env_parse("HEARTBEAT_TTL_SECONDS", 60)?),
            worker_timeout: Duration::from_secs(env_parse("WORKER_TIMEOUT_SECONDS", 300)?),
            dispatch_grace: Duration::from_secs(env_parse("DISPATCH_GRACE_SECONDS", 10)?),
            idle_poll_interval: Duration::from_millis(env_parse("IDLE_POLL_INTERVAL_MS", 1_000)?),
            error_backoff: Duration::from_millis(env_parse("ERROR_BACKOFF_MS", 2_000)?),
            per_job_estimate: Duration::from_secs(env_parse("PER_JOB_ESTIMATE_SECONDS", 20)?),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn env_or(key: &str, default: &str) -> Result<String> {
    Ok(std::env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default() {
        std::env::remove_var("SOME_UNSET_SCHEDULER_VAR");
        let v: u64 = env_parse("SOME_UNSET_SCHEDULER_VAR", 42).unwrap();
        assert_eq!(v, 42);
    }
}
