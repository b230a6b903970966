use anyhow::{Context, Result};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{cache::DEFAULT_TTL, registry::DEFAULT_OUTBOX_CAPACITY};

/// Runtime settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub cache_ttl: Duration,
    pub cache_purge_interval: Duration,
    pub max_message_len: usize,
    pub escalation_queue: usize,
    pub outbox_capacity: usize,
    pub telegram_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home_dir = lookup("HOME").unwrap_or_else(|| ".".into());
        let db_path = lookup("PARLEY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&home_dir).join(".parley").join("parley.db"));

        let telegram_token = lookup("TELOXIDE_TOKEN")
            .or_else(|| lookup("TELEGRAM_BOT_TOKEN"))
            .filter(|token| !token.trim().is_empty());

        Ok(Self {
            bind_addr: parse_or(&lookup, "PARLEY_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            db_path,
            cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "PARLEY_CACHE_TTL_SECS",
                DEFAULT_TTL.as_secs(),
            )?),
            cache_purge_interval: Duration::from_secs(
                parse_or(&lookup, "PARLEY_CACHE_PURGE_SECS", 60u64)?.max(1),
            ),
            max_message_len: parse_or(&lookup, "PARLEY_MAX_MESSAGE_LEN", 4096)?,
            escalation_queue: parse_or(&lookup, "PARLEY_ESCALATION_QUEUE", 256)?,
            outbox_capacity: parse_or(&lookup, "PARLEY_OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY)?
                .max(1),
            telegram_token,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("HOME", "/home/chat")]).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.db_path, PathBuf::from("/home/chat/.parley/parley.db"));
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.cache_purge_interval, Duration::from_secs(60));
        assert_eq!(config.max_message_len, 4096);
        assert_eq!(config.escalation_queue, 256);
        assert_eq!(config.outbox_capacity, 256);
        assert!(config.telegram_token.is_none());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("PARLEY_BIND_ADDR", "127.0.0.1:8080"),
            ("PARLEY_DB_PATH", "/tmp/chat.db"),
            ("PARLEY_CACHE_TTL_SECS", "30"),
            ("PARLEY_MAX_MESSAGE_LEN", "100"),
            ("PARLEY_OUTBOX_CAPACITY", "8"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.max_message_len, 100);
        assert_eq!(config.outbox_capacity, 8);
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
    }

    #[test]
    fn teloxide_token_wins() {
        let config = config(&[("TELOXIDE_TOKEN", "a"), ("TELEGRAM_BOT_TOKEN", "b")]).unwrap();
        assert_eq!(config.telegram_token.as_deref(), Some("a"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = config(&[("PARLEY_CACHE_TTL_SECS", "ten")]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_CACHE_TTL_SECS"));
    }
}
