use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cache::{DEFAULT_CACHE_CAPACITY_BYTES, DEFAULT_CACHE_TTL};
use crate::reader::DEFAULT_CHUNK_SIZE;
use crate::repository::RepositoryConfig;
use crate::workers::DEFAULT_WORKER_START_TIMEOUT;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HASH_LENGTH: usize = 6;
const MIN_HASH_LENGTH: usize = 5;
const MAX_HASH_LENGTH: usize = 32;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything needed to assemble a [`crate::ChannelStore`].
#[derive(Clone)]
pub struct ChannelStoreConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,

    /// Bare channel id (any `-100` bot-API prefix already stripped)
    pub channel_id: i64,

    pub port: u16,

    /// Public base URL used to build media links
    pub host: String,

    /// Number of hex characters kept from a file hash
    pub hash_length: usize,

    /// Session string of a user account; preferred over the bot token when set
    pub user_session: Option<String>,

    /// Extra session strings, one worker each
    pub string_sessions: Vec<String>,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    pub chunk_size: i64,
    pub cache_capacity_bytes: u64,
    pub cache_ttl: Duration,
    pub worker_start_timeout: Duration,
    pub connect_timeout: Duration,
    pub history_retry_budget: usize,
    pub min_history_batch: usize,
    pub empty_page_step: i32,
}

impl ChannelStoreConfig {
    pub fn new(
        api_id: i32,
        api_hash: &str,
        bot_token: &str,
        channel_id: i64,
        logs_dir: &Path,
    ) -> Self {
        Self {
            api_id,
            api_hash: api_hash.to_string(),
            bot_token: bot_token.to_string(),
            channel_id: normalize_channel_id(channel_id),
            port: DEFAULT_PORT,
            host: default_host(DEFAULT_PORT),
            hash_length: DEFAULT_HASH_LENGTH,
            user_session: None,
            string_sessions: Vec::new(),
            logs_dir: logs_dir.to_path_buf(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
            worker_start_timeout: DEFAULT_WORKER_START_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            history_retry_budget: RepositoryConfig::DEFAULT_HISTORY_RETRY_BUDGET,
            min_history_batch: RepositoryConfig::DEFAULT_MIN_HISTORY_BATCH,
            empty_page_step: RepositoryConfig::DEFAULT_EMPTY_PAGE_STEP,
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.trim_end_matches('/').to_string();
        self
    }

    pub fn with_string_sessions(mut self, sessions: Vec<String>) -> Self {
        self.string_sessions = sessions;
        self
    }

    pub fn with_user_session(mut self, session: &str) -> Self {
        self.user_session = Some(session.to_string());
        self
    }

    pub fn with_hash_length(mut self, hash_length: usize) -> Self {
        self.hash_length = clamp_hash_length(hash_length);
        self
    }

    /// Loads configuration from the process environment, after merging a `.env`
    /// file from the working directory if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(
                target: "channelstore::config::from_env",
                "Loaded environment from {}",
                path.display()
            ),
            Err(e) if e.not_found() => tracing::info!(
                target: "channelstore::config::from_env",
                "No .env file found, using process environment"
            ),
            Err(e) => {
                return Err(ConfigError::Invalid {
                    key: ".env",
                    value: String::new(),
                    reason: e.to_string(),
                });
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key -> value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| -> Option<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let api_id = parse(&require("API_ID")?, "API_ID")?;
        let api_hash = require("API_HASH")?;
        let bot_token = require("BOT_TOKEN")?;
        let channel_id: i64 = parse(&require("CHANNEL_ID")?, "CHANNEL_ID")?;
        let logs_dir = get("LOGS_DIR").unwrap_or_else(|| "./logs".to_string());

        let mut config = Self::new(
            api_id,
            &api_hash,
            &bot_token,
            channel_id,
            Path::new(&logs_dir),
        );

        if let Some(port) = get("PORT") {
            config.port = parse(&port, "PORT")?;
        }

        config.host = match get("HOST") {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => {
                let host = default_host(config.port);
                tracing::info!(
                    target: "channelstore::config::from_lookup",
                    "HOST not set, automatically set to {}",
                    host
                );
                host
            }
        };

        if let Some(hash_length) = get("HASH_LENGTH") {
            config.hash_length = clamp_hash_length(parse(&hash_length, "HASH_LENGTH")?);
        }

        config.user_session = get("USER_SESSION");
        config.string_sessions = get("STRING_SESSIONS")
            .map(|sessions| {
                sessions
                    .split(',')
                    .map(str::trim)
                    .filter(|session| !session.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(config)
    }

    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            channel_id: self.channel_id,
            public_host: self.host.clone(),
            hash_length: self.hash_length,
            chunk_size: self.chunk_size,
            cache_ttl: self.cache_ttl,
            history_retry_budget: self.history_retry_budget,
            min_history_batch: self.min_history_batch,
            empty_page_step: self.empty_page_step,
        }
    }
}

impl std::fmt::Debug for ChannelStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStoreConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<REDACTED>")
            .field("bot_token", &"<REDACTED>")
            .field("channel_id", &self.channel_id)
            .field("port", &self.port)
            .field("host", &self.host)
            .field("hash_length", &self.hash_length)
            .field("user_session", &self.user_session.as_ref().map(|_| "<REDACTED>"))
            .field("string_sessions", &self.string_sessions.len())
            .field("logs_dir", &self.logs_dir)
            .field("chunk_size", &self.chunk_size)
            .field("cache_capacity_bytes", &self.cache_capacity_bytes)
            .field("cache_ttl", &self.cache_ttl)
            .field("worker_start_timeout", &self.worker_start_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn parse<T>(value: &str, key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn default_host(port: u16) -> String {
    format!("http://localhost:{}", port)
}

/// Strips the `-100` prefix bot-API style channel ids carry.
pub fn normalize_channel_id(channel_id: i64) -> i64 {
    let digits = channel_id.unsigned_abs().to_string();
    match digits.strip_prefix("100") {
        Some(rest) if !rest.is_empty() => rest.parse().unwrap_or(channel_id.abs()),
        _ => channel_id.abs(),
    }
}

/// 0 or anything below 5 falls back to 6; anything above 32 is cut to 32.
pub fn clamp_hash_length(hash_length: usize) -> usize {
    if hash_length > MAX_HASH_LENGTH {
        MAX_HASH_LENGTH
    } else if hash_length < MIN_HASH_LENGTH {
        DEFAULT_HASH_LENGTH
    } else {
        hash_length
    }
}
