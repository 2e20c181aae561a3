//! The boundary to the messaging platform.
//!
//! The wire protocol itself lives outside this crate. A session implements
//! [`ChannelBackend`]; new sessions are opened through a [`SessionConnector`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::types::{
    ChatInfo, FileLocation, FileResponse, Identity, InputChannel, InputPeer, MessagesResponse,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Flood wait: retry after {0} seconds")]
    FloodWait(u64),

    #[error("Session error: {0}")]
    Session(String),
}

/// Per-session cache of resolved peers and their access hashes.
///
/// Access hashes are issued per account, so every session keeps its own storage.
#[derive(Debug, Default)]
pub struct PeerStorage {
    peers: DashMap<i64, InputPeer>,
}

impl PeerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<InputPeer> {
        self.peers.get(&id).map(|peer| *peer)
    }

    /// Stores (or replaces) the access hash for a channel.
    pub fn add_channel(&self, channel_id: i64, access_hash: i64) {
        self.peers.insert(
            channel_id,
            InputPeer::Channel(InputChannel {
                channel_id,
                access_hash,
            }),
        );
    }

    pub fn insert(&self, id: i64, peer: InputPeer) {
        self.peers.insert(id, peer);
    }

    pub fn remove(&self, id: i64) -> Option<InputPeer> {
        self.peers.remove(&id).map(|(_, peer)| peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// One authenticated session against the messaging platform.
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Reads up to `limit` messages older than `offset_id` (0 = newest), newest first.
    async fn get_history(
        &self,
        peer: &InputPeer,
        limit: i32,
        offset_id: i32,
    ) -> Result<MessagesResponse, BackendError>;

    /// Reads specific messages of a channel by id.
    async fn get_messages(
        &self,
        channel: &InputChannel,
        ids: &[i32],
    ) -> Result<MessagesResponse, BackendError>;

    /// Reads `limit` bytes of a file starting at the chunk-aligned `offset`.
    async fn get_file(
        &self,
        location: &FileLocation,
        offset: i64,
        limit: i64,
    ) -> Result<FileResponse, BackendError>;

    /// Looks a channel up by id, returning fresh access artifacts.
    async fn get_channels(&self, channel_id: i64) -> Result<Vec<ChatInfo>, BackendError>;

    fn peer_storage(&self) -> &PeerStorage;
}

/// Opens sessions from serialized session strings.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        session: &str,
        worker_id: usize,
    ) -> Result<(Arc<dyn ChannelBackend>, Identity), BackendError>;
}
