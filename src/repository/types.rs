use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_TTL;
use crate::caption::CaptionMetadata;
use crate::reader::DEFAULT_CHUNK_SIZE;
use crate::types::{Document, DocumentLocation};

/// A downloadable document stored in the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub location: DocumentLocation,
    pub file_size: i64,
    pub file_name: String,
    pub mime_type: String,
    pub id: i64,
}

impl File {
    pub fn from_document(document: &Document) -> Self {
        Self {
            location: document.location(),
            file_size: document.size,
            file_name: document.file_name().unwrap_or_default().to_string(),
            mime_type: document.mime_type.clone(),
            id: document.id,
        }
    }

    /// Short content-independent fingerprint used in public links.
    ///
    /// md5 over name, size, mime type and id (integers in decimal), hex encoded and
    /// cut to `length` characters.
    pub fn hash(&self, length: usize) -> String {
        let mut context = md5::Context::new();
        context.consume(self.file_name.as_bytes());
        context.consume(self.file_size.to_string().as_bytes());
        context.consume(self.mime_type.as_bytes());
        context.consume(self.id.to_string().as_bytes());

        let mut digest = hex::encode(context.compute().0);
        digest.truncate(length);
        digest
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub reaction: String,
    pub count: i32,
}

/// One logical entry of the channel: a caption message plus, optionally, the
/// document that shares its group id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub message_id: i32,
    pub grouped_id: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
    pub author: String,
    pub original_content: String,
    pub parsed_content: CaptionMetadata,
    pub reactions: Vec<Reaction>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub document_id: Option<i64>,
    pub document_size: Option<i64>,
    pub document_message_id: Option<i32>,
}

/// A backward-walking window over the channel's message ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub per_page: usize,
    /// Exclusive upper bound of the page; 0 starts at the newest message
    pub offset_id: i32,
    pub first_offset_id: i32,
    pub last_offset_id: i32,
    pub total: usize,
    pub search: Option<String>,
}

impl Pagination {
    pub fn new(per_page: usize, offset_id: i32) -> Self {
        Self {
            per_page,
            offset_id,
            ..Default::default()
        }
    }

    /// The cursor for the page after this one.
    pub fn next_page(&self) -> Self {
        Self {
            per_page: self.per_page,
            offset_id: self.last_offset_id,
            search: self.search.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedPosts {
    pub data: Vec<Post>,
    pub pagination: Pagination,
}

/// Repository settings
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Bare id of the backing channel
    pub channel_id: i64,

    /// Base URL prepended to media links
    pub public_host: String,

    pub hash_length: usize,
    pub chunk_size: i64,
    pub cache_ttl: Duration,

    /// Maximum number of history calls made while collecting one page
    pub history_retry_budget: usize,

    /// Lower bound on the messages requested per history call
    pub min_history_batch: usize,

    /// How far the offset moves back after an empty history page
    pub empty_page_step: i32,
}

impl RepositoryConfig {
    pub const DEFAULT_HISTORY_RETRY_BUDGET: usize = 30;
    pub const DEFAULT_MIN_HISTORY_BATCH: usize = 20;
    pub const DEFAULT_EMPTY_PAGE_STEP: i32 = 1;

    pub fn new(channel_id: i64, public_host: &str) -> Self {
        Self {
            channel_id,
            public_host: public_host.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            channel_id: 0,
            public_host: "http://localhost:8080".to_string(),
            hash_length: 6,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            history_retry_budget: Self::DEFAULT_HISTORY_RETRY_BUDGET,
            min_history_batch: Self::DEFAULT_MIN_HISTORY_BATCH,
            empty_page_step: Self::DEFAULT_EMPTY_PAGE_STEP,
        }
    }
}
