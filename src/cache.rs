//! In-memory cache for file descriptors and posts.
//!
//! Records are bincode-encoded and kept in a byte-bounded moka cache with a TTL
//! per entry. The cache is advisory: every caller must be able to rebuild a
//! record from the backend on a miss.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::repository::{File, Post};

/// Default capacity: 1 GiB of encoded records.
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;

/// Default time-to-live (12 hours). Long enough to outlive a browsing session,
/// short enough that upstream file references have not gone stale.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to encode cache record: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Cache lock poisoned")]
    Poisoned,
}

/// The two kinds of records kept in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    File,
    Post,
}

impl CacheKind {
    fn prefix(&self) -> &'static str {
        match self {
            CacheKind::File => "file",
            CacheKind::Post => "post",
        }
    }

    /// Key for a record derived from `message_id` as seen by the account `identity_id`.
    pub fn key(&self, message_id: i32, identity_id: i64) -> String {
        format!("{}:{}:{}", self.prefix(), message_id, identity_id)
    }
}

/// A value that can be stored in the [`MetadataCache`].
pub trait CacheRecord: Serialize + DeserializeOwned {
    const KIND: CacheKind;
}

impl CacheRecord for File {
    const KIND: CacheKind = CacheKind::File;
}

impl CacheRecord for Post {
    const KIND: CacheKind = CacheKind::Post;
}

#[derive(Clone)]
struct CacheEntry {
    kind: CacheKind,
    bytes: Arc<Vec<u8>>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct MetadataCache {
    // moka is safe on its own, but get/set pairs on one key are serialized here
    // so a reader never decodes a half-replaced record.
    store: RwLock<Cache<String, CacheEntry>>,
}

impl MetadataCache {
    /// Creates a cache holding at most `capacity_bytes` of encoded records.
    pub fn new(capacity_bytes: u64) -> Self {
        let store = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|key: &String, entry: &CacheEntry| -> u32 {
                (key.len() + entry.bytes.len())
                    .try_into()
                    .unwrap_or(u32::MAX)
            })
            .expire_after(PerEntryTtl)
            .build();

        tracing::info!(
            target: "channelstore::cache::new",
            "Initialized metadata cache ({} bytes)",
            capacity_bytes
        );

        Self {
            store: RwLock::new(store),
        }
    }

    /// Looks a record up. Expired, missing, foreign-kind and undecodable entries
    /// are all reported as a miss.
    pub fn get<T: CacheRecord>(&self, key: &str) -> Option<T> {
        let entry = {
            let store = self.store.read().ok()?;
            store.get(key)?
        };

        if entry.kind != T::KIND {
            tracing::warn!(
                target: "channelstore::cache::get",
                "Cache entry {} holds a {:?} record, expected {:?}",
                key,
                entry.kind,
                T::KIND
            );
            return None;
        }

        match bincode::deserialize(&entry.bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    target: "channelstore::cache::get",
                    "Failed to decode cache entry {}: {}",
                    key,
                    e
                );
                None
            }
        }
    }

    /// Stores a record for `ttl`, replacing any previous value under `key`.
    pub fn set<T: CacheRecord>(
        &self,
        key: &str,
        record: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = bincode::serialize(record)?;
        let entry = CacheEntry {
            kind: T::KIND,
            bytes: Arc::new(bytes),
            ttl,
        };

        let store = self.store.write().map_err(|_| CacheError::Poisoned)?;
        store.insert(key.to_string(), entry);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        let store = self.store.write().map_err(|_| CacheError::Poisoned)?;
        store.invalidate(key);
        Ok(())
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        match self.store.read() {
            Ok(store) => {
                store.run_pending_tasks();
                store.entry_count()
            }
            Err(_) => 0,
        }
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY_BYTES)
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entries", &self.entry_count())
            .finish()
    }
}
