//! Repository
//!
//! Answers every read the serving layer needs: pages of posts, single posts,
//! file metadata, and byte streams of videos and images. History is walked
//! through the worker pool, grouped into posts, and the derived records are
//! cached per worker identity.

mod processor;
mod types;


pub use processor::{
    MessageGroups, create_post_from_messages, extract_reactions, image_url,
    limit_groups_by_most_recent, video_url,
};
pub use types::{File, PaginatedPosts, Pagination, Post, Reaction, RepositoryConfig};

use std::sync::Arc;

use tokio::io::AsyncWrite;

use crate::cache::{CacheKind, CacheRecord, MetadataCache};
use crate::caption::CaptionParser;
use crate::error::{ChannelStoreError, Result};
use crate::range::ByteRange;
use crate::reader::{ChunkedRangeReader, IMAGE_PART_SIZE, download_object};
use crate::types::{
    ChatInfo, FileLocation, InputChannel, InputPeer, MessageClass, MessagesResponse, RawMessage,
};
use crate::workers::{Worker, WorkerPool};

/// An opened byte window of a video, ready to be streamed.
#[derive(Debug)]
pub struct VideoStream {
    pub file: File,
    pub range: ByteRange,
    pub reader: ChunkedRangeReader,
}

impl VideoStream {
    /// Value for the `Content-Range` response header.
    pub fn content_range(&self) -> String {
        self.range.content_range(self.file.file_size)
    }

    pub fn content_length(&self) -> i64 {
        self.range.len()
    }
}

pub struct Repository {
    workers: Arc<WorkerPool>,
    cache: Arc<MetadataCache>,
    parser: Arc<dyn CaptionParser>,
    config: RepositoryConfig,
}

impl Repository {
    /// Creates a repository and makes sure the first worker can address the
    /// configured channel.
    ///
    /// # Arguments
    ///
    /// * `workers` - Pool the repository reads through; must hold at least one worker
    /// * `cache` - Cache for derived post and file records
    /// * `parser` - Caption parser used when building posts
    /// * `config` - Channel, public host and tunables
    ///
    /// # Returns
    ///
    /// * `Err(ChannelStoreError::ChannelNotConfigured)` - The channel could not be found
    /// * `Err(ChannelStoreError::InvalidChannelType)` - The id points at something other than a channel
    pub async fn new(
        workers: Arc<WorkerPool>,
        cache: Arc<MetadataCache>,
        parser: Arc<dyn CaptionParser>,
        config: RepositoryConfig,
    ) -> Result<Self> {
        let repository = Self {
            workers,
            cache,
            parser,
            config,
        };

        let worker = repository.workers.first()?;
        let channel = repository.resolve_channel(&worker).await?;
        tracing::info!(
            target: "channelstore::repository::new",
            "Repository ready for channel {} via {}",
            channel.channel_id,
            worker
        );

        Ok(repository)
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Finds the channel in the worker's peer storage, looking it up on the
    /// backend when it is not there yet.
    async fn resolve_channel(&self, worker: &Worker) -> Result<InputChannel> {
        match worker.backend.peer_storage().get(self.config.channel_id) {
            Some(InputPeer::Channel(channel)) => return Ok(channel),
            Some(InputPeer::User { .. }) | Some(InputPeer::Chat { .. }) => {
                return Err(ChannelStoreError::InvalidChannelType);
            }
            Some(InputPeer::Empty) | None => {}
        }

        let chats = worker.backend.get_channels(self.config.channel_id).await?;
        match chats.into_iter().next() {
            Some(ChatInfo::Channel(channel)) => {
                worker
                    .backend
                    .peer_storage()
                    .add_channel(channel.id, channel.access_hash);
                Ok(channel.as_input())
            }
            Some(ChatInfo::ChannelForbidden { .. }) | Some(ChatInfo::Chat { .. }) => {
                Err(ChannelStoreError::InvalidChannelType)
            }
            None => Err(ChannelStoreError::ChannelNotConfigured),
        }
    }

    fn input_peer(&self, worker: &Worker) -> Result<InputPeer> {
        match worker.backend.peer_storage().get(self.config.channel_id) {
            None | Some(InputPeer::Empty) => {
                tracing::error!(
                    target: "channelstore::repository::input_peer",
                    "Channel {} not configured in peer storage of {}",
                    self.config.channel_id,
                    worker
                );
                Err(ChannelStoreError::ChannelNotConfigured)
            }
            Some(peer) => Ok(peer),
        }
    }

    fn input_channel(&self, worker: &Worker) -> Result<InputChannel> {
        match self.input_peer(worker)? {
            InputPeer::Channel(channel) => Ok(channel),
            _ => {
                tracing::error!(
                    target: "channelstore::repository::input_channel",
                    "Invalid channel type in peer storage of {}",
                    worker
                );
                Err(ChannelStoreError::InvalidChannelType)
            }
        }
    }

    /// Reads one window of channel history, newest first.
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of messages
    /// * `offset_id` - Only messages older than this id are returned; 0 starts at the newest
    pub async fn get_history(&self, limit: i32, offset_id: i32) -> Result<Vec<RawMessage>> {
        let worker = self.workers.next().await?;
        self.history_with(&worker, limit, offset_id).await
    }

    async fn history_with(
        &self,
        worker: &Worker,
        limit: i32,
        offset_id: i32,
    ) -> Result<Vec<RawMessage>> {
        let peer = self.input_peer(worker)?;
        let response = worker
            .backend
            .get_history(&peer, limit, offset_id)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    target: "channelstore::repository::get_history",
                    "Failed to get history: {}",
                    e
                );
            })?;
        into_messages(response)
    }

    /// Walks history backwards from the pagination offset until `per_page`
    /// groups have been collected or the retry budget runs out.
    pub async fn grouped_posts(&self, pagination: &Pagination) -> Result<MessageGroups> {
        let worker = self.workers.next().await?;
        self.collect_groups(&worker, pagination).await
    }

    async fn collect_groups(
        &self,
        worker: &Worker,
        pagination: &Pagination,
    ) -> Result<MessageGroups> {
        let needed = pagination.per_page;
        let mut groups = MessageGroups::new();
        if needed == 0 {
            return Ok(groups);
        }

        let batch = self
            .config
            .min_history_batch
            .max(needed.saturating_mul(2));
        let batch = i32::try_from(batch).unwrap_or(i32::MAX);
        let step = self.config.empty_page_step.max(1);
        let mut offset_id = pagination.offset_id;
        let mut budget = self.config.history_retry_budget;

        while groups.len() < needed && budget > 0 {
            budget -= 1;

            let messages = self.history_with(worker, batch, offset_id).await?;
            let Some(min_id) = messages.iter().map(|m| m.id).min() else {
                let next = offset_id - step;
                if next <= 0 {
                    break;
                }
                tracing::debug!(
                    target: "channelstore::repository::grouped_posts",
                    "Empty history page at offset {}, moving to {}",
                    offset_id,
                    next
                );
                offset_id = next;
                continue;
            };

            groups.extend(messages);
            offset_id = min_id;
            // Message ids start at 1, nothing is older
            if offset_id <= 1 {
                break;
            }
        }

        tracing::debug!(
            target: "channelstore::repository::grouped_posts",
            "Collected {} groups ({} needed), {} history calls left",
            groups.len(),
            needed,
            budget
        );

        Ok(limit_groups_by_most_recent(groups, needed))
    }

    /// Builds one page of posts, newest first, and fills in the cursor.
    pub async fn paginate_posts(&self, pagination: Pagination) -> Result<PaginatedPosts> {
        let worker = self.workers.next().await?;
        let groups = self.collect_groups(&worker, &pagination).await?;

        let mut posts: Vec<Post> = groups
            .iter()
            .filter_map(|(_, messages)| {
                create_post_from_messages(messages, self.parser.as_ref(), &self.config.public_host)
            })
            .collect();
        posts.sort_by(|a, b| b.message_id.cmp(&a.message_id));

        let mut pagination = pagination;
        pagination.total = posts.len();
        pagination.first_offset_id = posts.first().map(|p| p.message_id).unwrap_or_default();
        pagination.last_offset_id = posts.last().map(|p| p.message_id).unwrap_or_default();

        for post in &posts {
            self.cache_record(CacheKind::Post.key(post.message_id, worker.identity.id), post);
        }

        Ok(PaginatedPosts {
            data: posts,
            pagination,
        })
    }

    /// Fetches a single post by the id of its caption message.
    pub async fn get_post(&self, message_id: i32) -> Result<Post> {
        let worker = self.workers.next().await?;
        let key = CacheKind::Post.key(message_id, worker.identity.id);
        if let Some(post) = self.cache.get::<Post>(&key) {
            tracing::debug!(
                target: "channelstore::repository::get_post",
                "Using cached post {} for {}",
                message_id,
                worker
            );
            return Ok(post);
        }

        // The caption's document usually follows it directly
        let ids: Vec<i32> = std::iter::once(message_id)
            .chain(message_id.checked_add(1))
            .collect();
        let mut messages = self.messages_with(&worker, &ids).await?;
        messages.sort_by_key(|m| m.id);

        let anchor = messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.grouped_id)
            .ok_or_else(|| ChannelStoreError::NotFound(format!("post {}", message_id)))?;
        if anchor != 0 {
            messages.retain(|m| m.grouped_id == anchor);
        }

        let post =
            create_post_from_messages(&messages, self.parser.as_ref(), &self.config.public_host)
                .ok_or_else(|| ChannelStoreError::NotFound(format!("post {}", message_id)))?;

        self.cache_record(key, &post);
        Ok(post)
    }

    /// Fetches the descriptor of the document attached to a message.
    pub async fn get_file(&self, message_id: i32) -> Result<File> {
        let worker = self.workers.next().await?;
        self.file_with(&worker, message_id).await
    }

    async fn file_with(&self, worker: &Worker, message_id: i32) -> Result<File> {
        let key = CacheKind::File.key(message_id, worker.identity.id);
        if let Some(file) = self.cache.get::<File>(&key) {
            tracing::debug!(
                target: "channelstore::repository::get_file",
                "Using cached file {} for {}",
                message_id,
                worker
            );
            return Ok(file);
        }

        let messages = self.messages_with(worker, &[message_id]).await?;
        let file = messages
            .iter()
            .find(|m| m.id == message_id)
            .and_then(RawMessage::document)
            .map(File::from_document)
            .ok_or_else(|| ChannelStoreError::NotFound(format!("file {}", message_id)))?;

        self.cache_record(key, &file);
        Ok(file)
    }

    /// Short hash of a file's descriptor, `hash_length` hex characters long.
    pub async fn get_file_hash(&self, message_id: i32) -> Result<String> {
        let file = self.get_file(message_id).await?;
        Ok(file.hash(self.config.hash_length))
    }

    /// Opens the inclusive window `[start, end]` of a video.
    pub async fn open_video(&self, message_id: i32, start: i64, end: i64) -> Result<VideoStream> {
        let worker = self.workers.next().await?;
        let file = self.file_with(&worker, message_id).await?;
        let range = ByteRange::new(start, end, file.file_size)?;
        self.open_range(&worker, file, range)
    }

    /// Opens the window a `Range` header asks for; no header means the whole file.
    pub async fn open_video_range(
        &self,
        message_id: i32,
        range_header: Option<&str>,
    ) -> Result<VideoStream> {
        let worker = self.workers.next().await?;
        let file = self.file_with(&worker, message_id).await?;
        let range = match range_header {
            Some(header) => ByteRange::parse_first(file.file_size, header)?,
            None => ByteRange::full(file.file_size)?,
        };
        self.open_range(&worker, file, range)
    }

    fn open_range(&self, worker: &Worker, file: File, range: ByteRange) -> Result<VideoStream> {
        let reader = ChunkedRangeReader::new(
            Arc::clone(&worker.backend),
            FileLocation::Document(file.location.clone()),
            range.start,
            range.end,
            file.file_size,
            self.config.chunk_size,
        )?;

        tracing::debug!(
            target: "channelstore::repository::open_video",
            "Streaming {} of {} ({}) via {}",
            range.content_range(file.file_size),
            file.file_name,
            file.id,
            worker
        );

        Ok(VideoStream {
            file,
            range,
            reader,
        })
    }

    /// Copies bytes `[start, end]` of a video into `output`.
    pub async fn stream_video<W>(
        &self,
        message_id: i32,
        output: &mut W,
        start: i64,
        end: i64,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stream = self.open_video(message_id, start, end).await?;
        stream.reader.copy_to(output).await
    }

    /// Copies the window a `Range` header asks for into `output`.
    pub async fn stream_video_range<W>(
        &self,
        message_id: i32,
        range_header: Option<&str>,
        output: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stream = self.open_video_range(message_id, range_header).await?;
        stream.reader.copy_to(output).await
    }

    /// Copies the largest rendition of a message's photo into `output`.
    pub async fn stream_image<W>(&self, message_id: i32, output: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let worker = self.workers.next().await?;
        let messages = self.messages_with(&worker, &[message_id]).await?;
        let location = messages
            .iter()
            .find(|m| m.id == message_id)
            .and_then(RawMessage::photo)
            .map(|photo| FileLocation::Photo(photo.largest_location()))
            .ok_or_else(|| {
                tracing::error!(
                    target: "channelstore::repository::stream_image",
                    "No photo found in message {}",
                    message_id
                );
                ChannelStoreError::NotFound(format!("photo in message {}", message_id))
            })?;

        download_object(worker.backend.as_ref(), &location, IMAGE_PART_SIZE, output).await
    }

    async fn messages_with(&self, worker: &Worker, ids: &[i32]) -> Result<Vec<RawMessage>> {
        let channel = self.input_channel(worker)?;
        let response = worker
            .backend
            .get_messages(&channel, ids)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    target: "channelstore::repository::get_messages",
                    "Failed to fetch messages {:?}: {}",
                    ids,
                    e
                );
            })?;
        into_messages(response)
    }

    /// Cache writes are advisory; a failure only costs a later refetch.
    fn cache_record<T: CacheRecord>(&self, key: String, record: &T) {
        if let Err(e) = self.cache.set(&key, record, self.config.cache_ttl) {
            tracing::warn!(
                target: "channelstore::repository::cache_record",
                "Failed to cache {}: {}",
                key,
                e
            );
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("workers", &self.workers)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

fn into_messages(response: MessagesResponse) -> Result<Vec<RawMessage>> {
    let messages = match response {
        MessagesResponse::ChannelMessages { messages, .. } | MessagesResponse::Messages(messages) => {
            messages
        }
        MessagesResponse::NotModified { .. } => {
            return Err(ChannelStoreError::UnexpectedResponse(
                "messages not modified".to_string(),
            ));
        }
    };

    Ok(messages
        .into_iter()
        .filter_map(|message| match message {
            MessageClass::Message(message) => Some(message),
            MessageClass::Service { .. } | MessageClass::Empty { .. } => None,
        })
        .collect())
}
