use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

use crate::chat::{DEFAULT_CAPACITY, FullPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub storage_root: PathBuf,
    pub queue_capacity: usize,
    pub queue_policy: FullPolicy,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            storage_root: PathBuf::from("./messages"),
            queue_capacity: DEFAULT_CAPACITY,
            queue_policy: FullPolicy::FailFast,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            log_file: None,
        }
    }
}

impl Config {
    /// Reads `CHAT_*` variables, honouring a `.env` file if present.
    pub fn from_env() -> anyhow::Result<Config> {
        Config::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let mut cfg = Config::default();

        if let Some(addr) = parsed(&lookup, "CHAT_ADDR")? {
            cfg.addr = addr;
        }
        if let Some(root) = lookup("CHAT_STORAGE_ROOT") {
            cfg.storage_root = PathBuf::from(root);
        }
        if let Some(capacity) = parsed::<usize>(&lookup, "CHAT_QUEUE_CAPACITY")? {
            if capacity == 0 {
                return Err(anyhow!("CHAT_QUEUE_CAPACITY must be at least 1"));
            }
            cfg.queue_capacity = capacity;
        }
        if let Some(policy) = lookup("CHAT_QUEUE_POLICY") {
            cfg.queue_policy = policy
                .parse()
                .map_err(|e| anyhow!("invalid CHAT_QUEUE_POLICY: {e}"))?;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "CHAT_REQUEST_TIMEOUT_SECS")? {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>(&lookup, "CHAT_SHUTDOWN_TIMEOUT_SECS")? {
            cfg.shutdown_timeout = Duration::from_secs(secs);
        }
        cfg.log_file = lookup("CHAT_LOG_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        if cfg.queue_policy == FullPolicy::Block && cfg.request_timeout.is_zero() {
            return Err(anyhow!(
                "CHAT_QUEUE_POLICY=block needs a non-zero CHAT_REQUEST_TIMEOUT_SECS"
            ));
        }

        Ok(cfg)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid {key}: {raw:?}")))
        .transpose()
}
