//! Backend-facing types for channel messages, attached media and peers.
//!
//! These mirror the shapes the messaging platform hands back, modelled as closed
//! enums so every response variant has to be handled explicitly.

use serde::{Deserialize, Serialize};

/// The authenticated account a session is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user id of the account
    pub id: i64,

    /// Public username, if the account has one
    pub username: Option<String>,

    /// Whether the account is a bot
    pub bot: bool,
}

impl Identity {
    pub fn new(id: i64, username: Option<&str>, bot: bool) -> Self {
        Self {
            id,
            username: username.map(str::to_string),
            bot,
        }
    }
}

/// A channel together with the access hash needed to address it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputChannel {
    pub channel_id: i64,
    pub access_hash: i64,
}

/// A resolved peer as stored in a session's peer storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPeer {
    Empty,
    Channel(InputChannel),
    User { user_id: i64, access_hash: i64 },
    Chat { chat_id: i64 },
}

/// Chat descriptions returned when looking a channel up by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInfo {
    Channel(ChannelInfo),
    ChannelForbidden { id: i64 },
    Chat { id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: i64,
    pub access_hash: i64,
    pub username: Option<String>,
    pub title: String,
}

impl ChannelInfo {
    pub fn as_input(&self) -> InputChannel {
        InputChannel {
            channel_id: self.id,
            access_hash: self.access_hash,
        }
    }
}

/// Location of a document's bytes on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
}

/// Location of one rendition of a photo on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoLocation {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub thumb_size: String,
}

/// Anything the chunk download primitive can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    Document(DocumentLocation),
    Photo(PhotoLocation),
}

impl FileLocation {
    pub fn id(&self) -> i64 {
        match self {
            FileLocation::Document(location) => location.id,
            FileLocation::Photo(location) => location.id,
        }
    }
}

/// A single message as read from channel history.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: i32,

    /// Shared by every message of an album; 0 when the message stands alone
    pub grouped_id: i64,

    /// Unix timestamp (seconds)
    pub date: i64,

    pub text: String,
    pub post_author: Option<String>,
    pub reactions: Vec<ReactionCount>,
    pub media: Option<MediaKind>,
}

impl RawMessage {
    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    /// The attached document, if the message carries a non-empty one.
    pub fn document(&self) -> Option<&Document> {
        match &self.media {
            Some(MediaKind::Document(Some(document))) => Some(document),
            _ => None,
        }
    }

    /// Whether the message has a document attachment at all, even an empty one.
    pub fn is_document(&self) -> bool {
        matches!(self.media, Some(MediaKind::Document(_)))
    }

    pub fn photo(&self) -> Option<&Photo> {
        match &self.media {
            Some(MediaKind::Photo(Some(photo))) => Some(photo),
            _ => None,
        }
    }
}

/// Media attached to a message.
///
/// `None` inside `Document`/`Photo` is the backend's "empty" variant, which shows
/// up for media that was deleted or is no longer accessible.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaKind {
    Document(Option<Document>),
    Photo(Option<Photo>),
    WebPage { url: String },
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub size: i64,
    pub mime_type: String,
    pub attributes: Vec<DocumentAttribute>,
}

impl Document {
    pub fn file_name(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| match attribute {
            DocumentAttribute::Filename(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn location(&self) -> DocumentLocation {
        DocumentLocation {
            id: self.id,
            access_hash: self.access_hash,
            file_reference: self.file_reference.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentAttribute {
    Filename(String),
    Video { duration: f64, width: i32, height: i32 },
    Audio { duration: i32 },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub sizes: Vec<PhotoSize>,
}

impl Photo {
    /// Location of the last (largest) listed rendition.
    pub fn largest_location(&self) -> PhotoLocation {
        PhotoLocation {
            id: self.id,
            access_hash: self.access_hash,
            file_reference: self.file_reference.clone(),
            thumb_size: self
                .sizes
                .last()
                .map(|size| size.kind.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoSize {
    /// Rendition type letter, e.g. "m", "x", "y"
    pub kind: String,
    pub width: i32,
    pub height: i32,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionCount {
    pub reaction: Reaction,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    Emoji(String),
    CustomEmoji(i64),
    Paid,
}

/// An entry of a message list response.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageClass {
    Message(RawMessage),
    Service { id: i32 },
    Empty { id: i32 },
}

/// Response shapes for history and message-by-id lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagesResponse {
    ChannelMessages { messages: Vec<MessageClass>, count: i32 },
    Messages(Vec<MessageClass>),
    NotModified { count: i32 },
}

/// Response shapes for a chunk download.
#[derive(Debug, Clone, PartialEq)]
pub enum FileResponse {
    File(Vec<u8>),
    CdnRedirect { dc_id: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> Document {
        Document {
            id: 7,
            access_hash: 99,
            file_reference: vec![1, 2, 3],
            size: 2048,
            mime_type: "video/mp4".to_string(),
            attributes: vec![
                DocumentAttribute::Video {
                    duration: 12.5,
                    width: 1280,
                    height: 720,
                },
                DocumentAttribute::Filename("movie.mp4".to_string()),
            ],
        }
    }

    #[test]
    fn test_document_file_name() {
        assert_eq!(document().file_name(), Some("movie.mp4"));

        let mut nameless = document();
        nameless.attributes.retain(|a| !matches!(a, DocumentAttribute::Filename(_)));
        assert_eq!(nameless.file_name(), None);
    }

    #[test]
    fn test_document_location() {
        let location = document().location();
        assert_eq!(location.id, 7);
        assert_eq!(location.access_hash, 99);
        assert_eq!(location.file_reference, vec![1, 2, 3]);
    }

    #[test]
    fn test_photo_largest_location_uses_last_size() {
        let photo = Photo {
            id: 1,
            access_hash: 2,
            file_reference: vec![],
            sizes: vec![
                PhotoSize {
                    kind: "m".to_string(),
                    width: 320,
                    height: 240,
                    size: 100,
                },
                PhotoSize {
                    kind: "y".to_string(),
                    width: 1280,
                    height: 960,
                    size: 900,
                },
            ],
        };
        assert_eq!(photo.largest_location().thumb_size, "y");

        let bare = Photo {
            sizes: vec![],
            ..photo
        };
        assert_eq!(bare.largest_location().thumb_size, "");
    }

    #[test]
    fn test_message_media_accessors() {
        let message = RawMessage {
            id: 1,
            grouped_id: 0,
            date: 0,
            text: String::new(),
            post_author: None,
            reactions: vec![],
            media: Some(MediaKind::Document(None)),
        };
        assert!(message.is_document());
        assert!(message.document().is_none());
        assert!(message.photo().is_none());
        assert!(!message.has_text());
    }
}
