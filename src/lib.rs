pub use crate::backend::{BackendError, ChannelBackend, PeerStorage, SessionConnector};
pub use crate::cache::{CacheError, CacheKind, CacheRecord, MetadataCache};
pub use crate::caption::{CaptionMetadata, CaptionParser, PlainCaptionParser};
pub use crate::config::{ChannelStoreConfig, ConfigError};
pub use crate::error::{ChannelStoreError, ErrorClass, Result};
pub use crate::range::{ByteRange, RangeError};
pub use crate::reader::{ChunkedRangeReader, PartCursor, download_object};
pub use crate::repository::{
    File, PaginatedPosts, Pagination, Post, Repository, RepositoryConfig, VideoStream,
};
pub use crate::workers::{Worker, WorkerError, WorkerPool};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

pub mod backend;
mod cache;
mod caption;
mod config;
mod error;
mod range;
mod reader;
pub mod repository;
pub mod types;
mod workers;

#[cfg(test)]
pub(crate) mod test_utils;

use crate::types::Identity;

static TRACING_GUARDS: OnceLock<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceLock::new();
static TRACING_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Installs the process-wide subscriber: stdout plus a daily log file in `logs_dir`.
///
/// Only the first call does any work; later calls report its outcome.
pub fn init_tracing(logs_dir: &Path) -> Result<()> {
    TRACING_INIT
        .get_or_init(|| {
            let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("channelstore")
                .filename_suffix("log")
                .build(logs_dir)
                .map_err(|e| format!("Failed to create file appender: {}", e))?;

            let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
            let (non_blocking_stdout, stdout_guard) =
                tracing_appender::non_blocking(std::io::stdout());

            TRACING_GUARDS
                .set(Mutex::new(Some((file_guard, stdout_guard))))
                .ok();

            let stdout_layer = Layer::new()
                .with_writer(non_blocking_stdout)
                .with_ansi(true)
                .with_target(true);

            let file_layer = Layer::new()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true);

            Registry::default()
                .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(ChannelStoreError::LoggingSetup)
}

/// The assembled service: cache, worker pool and repository for one channel.
pub struct ChannelStore {
    pub config: ChannelStoreConfig,
    cache: Arc<MetadataCache>,
    workers: Arc<WorkerPool>,
    repository: Repository,
}

impl ChannelStore {
    /// Builds the service around an already connected default session.
    ///
    /// Sets up the logs directory and tracing, creates the cache, starts the
    /// configured worker sessions (best effort) next to the default one, and
    /// resolves the channel.
    ///
    /// # Arguments
    ///
    /// * `config` - A [`ChannelStoreConfig`]
    /// * `default_backend` - Session the service was started with; always part of the pool
    /// * `default_identity` - Account of the default session
    /// * `connector` - Opens the extra worker sessions listed in the config
    /// * `parser` - Caption parser used to build posts
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created, logging cannot
    /// be set up, or the channel cannot be resolved. Failed worker sessions are
    /// logged and skipped.
    pub async fn initialize(
        config: ChannelStoreConfig,
        default_backend: Arc<dyn ChannelBackend>,
        default_identity: Identity,
        connector: Arc<dyn SessionConnector>,
        parser: Arc<dyn CaptionParser>,
    ) -> Result<Self> {
        let logs_dir = &config.logs_dir;
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))
            .map_err(ChannelStoreError::from)?;

        init_tracing(logs_dir)?;

        tracing::debug!(
            target: "channelstore::initialize",
            "Logging initialized in directory: {:?}",
            logs_dir
        );

        let cache = Arc::new(MetadataCache::new(config.cache_capacity_bytes));
        let workers = Arc::new(WorkerPool::new(config.channel_id, connector));
        workers.add_default(default_backend, default_identity);
        workers
            .start_sessions(config.string_sessions.clone(), config.worker_start_timeout)
            .await;

        let repository = Repository::new(
            Arc::clone(&workers),
            Arc::clone(&cache),
            parser,
            config.repository_config(),
        )
        .await?;

        tracing::info!(
            target: "channelstore::initialize",
            "Channel store ready with {} workers",
            workers.len()
        );

        Ok(Self {
            config,
            cache,
            workers,
            repository,
        })
    }

    /// Opens the default session through `connector`, bounded by the configured
    /// connect timeout, and then initializes the service.
    ///
    /// The user session is preferred; without one the bot token is handed to the
    /// connector instead.
    pub async fn connect(
        config: ChannelStoreConfig,
        connector: Arc<dyn SessionConnector>,
        parser: Arc<dyn CaptionParser>,
    ) -> Result<Self> {
        let session = config
            .user_session
            .clone()
            .unwrap_or_else(|| config.bot_token.clone());

        let (backend, identity) =
            tokio::time::timeout(config.connect_timeout, connector.connect(&session, 0))
                .await
                .map_err(|_| WorkerError::Timeout(config.connect_timeout))??;

        Self::initialize(config, backend, identity, connector, parser).await
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStore")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("cache", &"<REDACTED>")
            .field("repository", &"<REDACTED>")
            .finish()
    }
}
