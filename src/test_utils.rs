//! In-memory backend and message fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, ChannelBackend, PeerStorage, SessionConnector};
use crate::types::{
    ChannelInfo, ChatInfo, Document, DocumentAttribute, DocumentLocation, FileLocation,
    FileResponse, Identity, InputChannel, InputPeer, MediaKind, MessageClass, MessagesResponse,
    Photo, PhotoSize, RawMessage,
};

pub const TEST_CHANNEL_ID: i64 = 1234567890;

/// Scriptable stand-in for one backend session.
pub struct MockBackend {
    peers: PeerStorage,
    messages: Mutex<BTreeMap<i32, RawMessage>>,
    objects: Mutex<HashMap<i64, Vec<u8>>>,
    channel_info: Mutex<Option<ChatInfo>>,
    history_requests: Mutex<Vec<(i32, i32)>>,
    empty_chunks: AtomicUsize,
    pad_chunks: AtomicBool,
    overlong_chunks: AtomicUsize,
    shorten_next_chunk: Mutex<Option<usize>>,
    fail_history: AtomicBool,
    fail_files: AtomicBool,
    fail_channels: AtomicBool,
    message_calls: AtomicUsize,
    file_calls: AtomicUsize,
    channel_calls: AtomicUsize,
}

impl MockBackend {
    pub const ACCESS_HASH: i64 = 777;

    pub fn new() -> Self {
        Self {
            peers: PeerStorage::new(),
            messages: Mutex::new(BTreeMap::new()),
            objects: Mutex::new(HashMap::new()),
            channel_info: Mutex::new(Some(ChatInfo::Channel(ChannelInfo {
                id: TEST_CHANNEL_ID,
                access_hash: Self::ACCESS_HASH,
                username: Some("store".to_string()),
                title: "Store".to_string(),
            }))),
            history_requests: Mutex::new(Vec::new()),
            empty_chunks: AtomicUsize::new(0),
            pad_chunks: AtomicBool::new(false),
            overlong_chunks: AtomicUsize::new(0),
            shorten_next_chunk: Mutex::new(None),
            fail_history: AtomicBool::new(false),
            fail_files: AtomicBool::new(false),
            fail_channels: AtomicBool::new(false),
            message_calls: AtomicUsize::new(0),
            file_calls: AtomicUsize::new(0),
            channel_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_message(&self, message: RawMessage) {
        self.messages.lock().unwrap().insert(message.id, message);
    }

    pub fn add_messages<I: IntoIterator<Item = RawMessage>>(&self, messages: I) {
        for message in messages {
            self.add_message(message);
        }
    }

    pub fn add_object(&self, id: i64, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(id, bytes);
    }

    pub fn object_len(&self, id: i64) -> usize {
        self.objects.lock().unwrap().get(&id).map_or(0, Vec::len)
    }

    pub fn set_channel_info(&self, info: Option<ChatInfo>) {
        *self.channel_info.lock().unwrap() = info;
    }

    /// The next `count` chunk requests return no bytes.
    pub fn inject_empty_chunks(&self, count: usize) {
        self.empty_chunks.store(count, Ordering::SeqCst);
    }

    /// Pads every chunk with zeros up to the requested limit.
    pub fn pad_chunks(&self, pad: bool) {
        self.pad_chunks.store(pad, Ordering::SeqCst);
    }

    /// Appends `extra` bytes of `0xEE` to every chunk, past what was asked for.
    pub fn overlong_chunks(&self, extra: usize) {
        self.overlong_chunks.store(extra, Ordering::SeqCst);
    }

    /// The next chunk request returns only its first `len` bytes.
    pub fn shorten_next_chunk(&self, len: usize) {
        *self.shorten_next_chunk.lock().unwrap() = Some(len);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_files(&self, fail: bool) {
        self.fail_files.store(fail, Ordering::SeqCst);
    }

    pub fn fail_channels(&self, fail: bool) {
        self.fail_channels.store(fail, Ordering::SeqCst);
    }

    /// `(limit, offset_id)` of every history request, in order.
    pub fn history_requests(&self) -> Vec<(i32, i32)> {
        self.history_requests.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.history_requests.lock().unwrap().len()
    }

    pub fn message_calls(&self) -> usize {
        self.message_calls.load(Ordering::SeqCst)
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn channel_calls(&self) -> usize {
        self.channel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelBackend for MockBackend {
    async fn get_history(
        &self,
        _peer: &InputPeer,
        limit: i32,
        offset_id: i32,
    ) -> Result<MessagesResponse, BackendError> {
        self.history_requests.lock().unwrap().push((limit, offset_id));
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection reset".to_string()));
        }

        let stored = self.messages.lock().unwrap();
        let messages: Vec<MessageClass> = stored
            .values()
            .rev()
            .filter(|m| offset_id == 0 || m.id < offset_id)
            .take(limit.max(0) as usize)
            .cloned()
            .map(MessageClass::Message)
            .collect();

        Ok(MessagesResponse::ChannelMessages {
            messages,
            count: stored.len() as i32,
        })
    }

    async fn get_messages(
        &self,
        _channel: &InputChannel,
        ids: &[i32],
    ) -> Result<MessagesResponse, BackendError> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection reset".to_string()));
        }

        let stored = self.messages.lock().unwrap();
        let messages = ids
            .iter()
            .map(|id| match stored.get(id) {
                Some(message) => MessageClass::Message(message.clone()),
                None => MessageClass::Empty { id: *id },
            })
            .collect();

        Ok(MessagesResponse::ChannelMessages {
            messages,
            count: stored.len() as i32,
        })
    }

    async fn get_file(
        &self,
        location: &FileLocation,
        offset: i64,
        limit: i64,
    ) -> Result<FileResponse, BackendError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_files.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        if self
            .empty_chunks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(FileResponse::File(Vec::new()));
        }

        let objects = self.objects.lock().unwrap();
        let object = objects.get(&location.id()).ok_or(BackendError::Rpc {
            code: 400,
            message: "FILE_REFERENCE_INVALID".to_string(),
        })?;

        let start = (offset as usize).min(object.len());
        let end = ((offset + limit) as usize).min(object.len());
        let mut chunk = object[start..end].to_vec();
        if self.pad_chunks.load(Ordering::SeqCst) {
            chunk.resize(limit as usize, 0);
        }
        if let Some(len) = self.shorten_next_chunk.lock().unwrap().take() {
            chunk.truncate(len);
        }
        let extra = self.overlong_chunks.load(Ordering::SeqCst);
        chunk.extend(std::iter::repeat_n(0xEE, extra));
        Ok(FileResponse::File(chunk))
    }

    async fn get_channels(&self, _channel_id: i64) -> Result<Vec<ChatInfo>, BackendError> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_channels.load(Ordering::SeqCst) {
            return Err(BackendError::Rpc {
                code: 400,
                message: "CHANNEL_INVALID".to_string(),
            });
        }
        Ok(self.channel_info.lock().unwrap().clone().into_iter().collect())
    }

    fn peer_storage(&self) -> &PeerStorage {
        &self.peers
    }
}

/// Opens [`MockBackend`] sessions. `"fail"` is rejected and `"slow"` never
/// finishes connecting; anything else succeeds.
pub struct MockConnector {
    shared: Option<Arc<MockBackend>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self { shared: None }
    }

    /// Every session connects to the same backend.
    pub fn with_backend(backend: Arc<MockBackend>) -> Self {
        Self {
            shared: Some(backend),
        }
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        session: &str,
        worker_id: usize,
    ) -> Result<(Arc<dyn ChannelBackend>, Identity), BackendError> {
        match session {
            "fail" => return Err(BackendError::Session("invalid session string".to_string())),
            "slow" => tokio::time::sleep(Duration::from_secs(3600)).await,
            _ => {}
        }

        let backend: Arc<dyn ChannelBackend> = match &self.shared {
            Some(backend) => backend.clone(),
            None => Arc::new(MockBackend::new()),
        };
        let username = format!("worker{}", worker_id);
        Ok((
            backend,
            Identity::new(1000 + worker_id as i64, Some(username.as_str()), true),
        ))
    }
}

/// Deterministic, non-repeating-per-chunk test content.
pub fn reference_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn document_location(id: i64) -> DocumentLocation {
    DocumentLocation {
        id,
        access_hash: 1,
        file_reference: vec![1, 2, 3],
    }
}

pub fn caption_message(id: i32, grouped_id: i64, text: &str) -> RawMessage {
    RawMessage {
        id,
        grouped_id,
        date: 1_700_000_000 + i64::from(id),
        text: text.to_string(),
        post_author: None,
        reactions: Vec::new(),
        media: None,
    }
}

pub fn document_message(id: i32, grouped_id: i64, document_id: i64, size: i64) -> RawMessage {
    let location = document_location(document_id);
    RawMessage {
        media: Some(MediaKind::Document(Some(Document {
            id: location.id,
            access_hash: location.access_hash,
            file_reference: location.file_reference,
            size,
            mime_type: "video/mp4".to_string(),
            attributes: vec![
                DocumentAttribute::Video {
                    duration: 5400.0,
                    width: 1920,
                    height: 1080,
                },
                DocumentAttribute::Filename(format!("{}.mp4", document_id)),
            ],
        }))),
        ..caption_message(id, grouped_id, "")
    }
}

pub fn photo_message(id: i32, grouped_id: i64, photo_id: i64) -> RawMessage {
    RawMessage {
        media: Some(MediaKind::Photo(Some(Photo {
            id: photo_id,
            access_hash: 2,
            file_reference: vec![4, 5, 6],
            sizes: vec![
                PhotoSize {
                    kind: "m".to_string(),
                    width: 320,
                    height: 180,
                    size: 10_000,
                },
                PhotoSize {
                    kind: "y".to_string(),
                    width: 1280,
                    height: 720,
                    size: 90_000,
                },
            ],
        }))),
        ..caption_message(id, grouped_id, "")
    }
}
