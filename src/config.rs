use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::engine::EnginePolicy;

/// Settings read from the environment (and `.env`, if there is one).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    /// Base of the links served by the API index.
    pub public_url: String,
    /// Polls live in memory when this is unset.
    pub database_url: Option<String>,
    pub max_choices: usize,
    pub draft_batch_size: usize,
    pub lock_timeout: Duration,
    pub retention: Option<chrono::Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // a missing .env is fine, the variables may come from the environment
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_address = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&lookup, "PORT", 1337u16)?;
        let public_url = lookup("PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", port));
        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());

        let max_choices = parse_or(&lookup, "MAX_CHOICES", 10usize)?;
        if max_choices < 2 {
            bail!("MAX_CHOICES must be at least 2, got {}", max_choices);
        }
        let draft_batch_size = parse_or(&lookup, "DRAFT_BATCH_SIZE", 1usize)?;
        if draft_batch_size == 0 {
            bail!("DRAFT_BATCH_SIZE must be at least 1");
        }
        let lock_timeout = Duration::from_millis(parse_or(&lookup, "LOCK_TIMEOUT_MS", 5000u64)?);
        let retention = match lookup("POLL_RETENTION_DAYS") {
            Some(days) => {
                let days: i64 = parse("POLL_RETENTION_DAYS", &days)?;
                if days <= 0 {
                    bail!("POLL_RETENTION_DAYS must be positive, got {}", days);
                }
                Some(chrono::Duration::days(days))
            }
            None => None,
        };

        Ok(Config {
            bind_address,
            port,
            public_url,
            database_url,
            max_choices,
            draft_batch_size,
            lock_timeout,
            retention,
        })
    }

    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            max_choices: self.max_choices,
            lock_timeout: self.lock_timeout,
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Could not parse {}={:?}: {}", key, value, e))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => parse(key, &value),
        None => Ok(default),
    }
}
