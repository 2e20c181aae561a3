//! Pool of independently authenticated sessions against the backing channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::backend::{BackendError, ChannelBackend, SessionConnector};
use crate::error::ErrorClass;
use crate::types::{ChatInfo, Identity};

/// Per-worker bound on session startup.
pub const DEFAULT_WORKER_START_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("no channels found for ID {0}")]
    ChannelNotFound(i64),

    #[error("chat {0} is not an accessible channel")]
    NotAChannel(i64),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No workers available")]
    NoWorkers,
}

impl WorkerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Backend(_) | WorkerError::Timeout(_) | WorkerError::NoWorkers => {
                ErrorClass::Unavailable
            }
            WorkerError::ChannelNotFound(_) | WorkerError::NotAChannel(_) => {
                ErrorClass::Misconfigured
            }
        }
    }
}

/// One authenticated session plus the account it is logged in as.
pub struct Worker {
    pub id: usize,
    pub backend: Arc<dyn ChannelBackend>,
    pub identity: Identity,
}

impl Worker {
    pub fn new(id: usize, backend: Arc<dyn ChannelBackend>, identity: Identity) -> Self {
        Self {
            id,
            backend,
            identity,
        }
    }

    /// Re-resolves `channel_id` and stores its fresh access hash in this
    /// worker's peer storage.
    pub async fn ensure_valid_authorization(&self, channel_id: i64) -> Result<(), WorkerError> {
        let chats = self.backend.get_channels(channel_id).await?;

        match chats.into_iter().next() {
            None => Err(WorkerError::ChannelNotFound(channel_id)),
            Some(ChatInfo::Channel(channel)) => {
                self.backend
                    .peer_storage()
                    .add_channel(channel.id, channel.access_hash);
                tracing::debug!(
                    target: "channelstore::workers::ensure_valid_authorization",
                    "Access hash updated for channel {} on {}",
                    channel.id,
                    self
                );
                Ok(())
            }
            Some(ChatInfo::ChannelForbidden { .. }) | Some(ChatInfo::Chat { .. }) => {
                Err(WorkerError::NotAChannel(channel_id))
            }
        }
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{Worker ({}|@{})}}",
            self.id,
            self.identity.username.as_deref().unwrap_or_default()
        )
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("backend", &"<REDACTED>")
            .finish()
    }
}

/// Round-robin pool of workers bound to one channel.
///
/// The pool only grows. The selection counter is the only state shared between
/// callers; no lock is held across a backend call.
pub struct WorkerPool {
    workers: RwLock<Vec<Arc<Worker>>>,
    index: Mutex<usize>,
    next_id: AtomicUsize,
    channel_id: i64,
    connector: Arc<dyn SessionConnector>,
}

impl WorkerPool {
    pub fn new(channel_id: i64, connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            index: Mutex::new(0),
            next_id: AtomicUsize::new(1),
            channel_id,
            connector,
        }
    }

    pub fn channel_id(&self) -> i64 {
        self.channel_id
    }

    pub fn len(&self) -> usize {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, worker: Worker) -> Arc<Worker> {
        let worker = Arc::new(worker);
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&worker));
        worker
    }

    /// Registers an already connected session, usually the one the service was
    /// started with.
    pub fn add_default(&self, backend: Arc<dyn ChannelBackend>, identity: Identity) -> Arc<Worker> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let worker = self.push(Worker::new(id, backend, identity));
        tracing::info!(
            target: "channelstore::workers::add_default",
            "Default worker {} loaded",
            worker
        );
        worker
    }

    /// Opens a new session from a session string and adds it to the pool.
    ///
    /// # Arguments
    ///
    /// * `session` - Serialized session string understood by the connector
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<Worker>)` - The newly added worker
    /// * `Err(WorkerError::Backend)` - If the connector could not open the session
    pub async fn add(&self, session: &str) -> Result<Arc<Worker>, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (backend, identity) = self.connector.connect(session, id).await?;
        let worker = self.push(Worker::new(id, backend, identity));
        tracing::info!(
            target: "channelstore::workers::add",
            "Worker {} loaded",
            worker
        );
        Ok(worker)
    }

    /// Starts every session concurrently, each bounded by `timeout`.
    ///
    /// Failures and timeouts are logged and dropped.
    ///
    /// # Returns
    ///
    /// The number of sessions that started.
    pub async fn start_sessions(self: &Arc<Self>, sessions: Vec<String>, timeout: Duration) -> usize {
        let total = sessions.len();
        if total == 0 {
            tracing::info!(
                target: "channelstore::workers::start_sessions",
                "No worker sessions provided, skipping worker initialization"
            );
            return 0;
        }

        tracing::info!(
            target: "channelstore::workers::start_sessions",
            "Starting {} workers",
            total
        );

        let mut tasks = JoinSet::new();
        for (index, session) in sessions.into_iter().enumerate() {
            let pool = Arc::clone(self);
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, pool.add(&session)).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::Timeout(timeout)),
                };
                (index, result)
            });
        }

        let mut started = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => started += 1,
                Ok((index, Err(e))) => {
                    tracing::error!(
                        target: "channelstore::workers::start_sessions",
                        "Failed to start worker {}: {}",
                        index,
                        e
                    );
                }
                Err(e) => {
                    tracing::error!(
                        target: "channelstore::workers::start_sessions",
                        "Worker startup task failed: {}",
                        e
                    );
                }
            }
        }

        tracing::info!(
            target: "channelstore::workers::start_sessions",
            "Successfully started {}/{} workers",
            started,
            total
        );
        started
    }

    /// Picks the next worker without touching the backend.
    ///
    /// # Returns
    ///
    /// The raw counter value that was consumed and the selected worker.
    pub fn select(&self) -> Result<(usize, Arc<Worker>), WorkerError> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        if workers.is_empty() {
            return Err(WorkerError::NoWorkers);
        }

        let raw = {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            let raw = *index;
            *index = index.wrapping_add(1);
            raw
        };

        Ok((raw, Arc::clone(&workers[raw % workers.len()])))
    }

    /// Picks the next worker and repairs its access hash for the pool's channel.
    ///
    /// A failed repair is logged and the worker is returned anyway; its last
    /// known access hash usually still works.
    pub async fn next(&self) -> Result<Arc<Worker>, WorkerError> {
        let (_, worker) = self.select()?;

        if let Err(e) = worker.ensure_valid_authorization(self.channel_id).await {
            tracing::warn!(
                target: "channelstore::workers::next",
                "Failed to update access hash for {}: {}",
                worker,
                e
            );
        }

        tracing::debug!(
            target: "channelstore::workers::next",
            "Using worker {}",
            worker
        );
        Ok(worker)
    }

    /// The first worker added, used for one-off resolution at startup.
    pub fn first(&self) -> Result<Arc<Worker>, WorkerError> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
            .ok_or(WorkerError::NoWorkers)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("channel_id", &self.channel_id)
            .field("workers", &self.len())
            .finish()
    }
}
