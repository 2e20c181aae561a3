//! Grouping of raw channel messages into posts.
//!
//! Stateless: every function here works on the messages it is handed and never
//! talks to the backend.

use std::collections::HashMap;

use chrono::DateTime;

use super::types::{Post, Reaction};
use crate::caption::CaptionParser;
use crate::types::{RawMessage, Reaction as BackendReaction, ReactionCount};

/// Messages bucketed by group id, remembering the order groups were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageGroups {
    order: Vec<i64>,
    groups: HashMap<i64, Vec<RawMessage>>,
}

impl MessageGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds grouped messages; messages with group id 0 stand alone and are skipped.
    pub fn extend<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = RawMessage>,
    {
        for message in messages {
            if message.grouped_id == 0 {
                continue;
            }
            let grouped_id = message.grouped_id;
            self.groups
                .entry(grouped_id)
                .or_insert_with(|| {
                    self.order.push(grouped_id);
                    Vec::new()
                })
                .push(message);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, grouped_id: i64) -> Option<&[RawMessage]> {
        self.groups.get(&grouped_id).map(Vec::as_slice)
    }

    /// Group ids in first-seen order.
    pub fn group_ids(&self) -> &[i64] {
        &self.order
    }

    /// Groups in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[RawMessage])> {
        self.order
            .iter()
            .filter_map(|id| self.groups.get(id).map(|messages| (*id, messages.as_slice())))
    }

    pub fn into_groups(mut self) -> Vec<(i64, Vec<RawMessage>)> {
        self.order
            .into_iter()
            .filter_map(|id| self.groups.remove(&id).map(|messages| (id, messages)))
            .collect()
    }
}

fn max_message_id(messages: &[RawMessage]) -> i32 {
    messages.iter().map(|m| m.id).max().unwrap_or(i32::MIN)
}

/// Keeps the `needed` groups whose newest message is the most recent.
///
/// Ties keep first-seen order; the retained groups come back ordered newest first.
pub fn limit_groups_by_most_recent(groups: MessageGroups, needed: usize) -> MessageGroups {
    if groups.len() <= needed {
        return groups;
    }

    let mut ranked = groups.into_groups();
    // sort_by is stable, so equal maxima stay in insertion order
    ranked.sort_by(|(_, a), (_, b)| max_message_id(b).cmp(&max_message_id(a)));
    ranked.truncate(needed);

    let mut limited = MessageGroups::new();
    for (_, messages) in ranked {
        limited.extend(messages);
    }
    limited
}

/// Keeps plain emoji reactions in backend order.
pub fn extract_reactions(reactions: &[ReactionCount]) -> Vec<Reaction> {
    reactions
        .iter()
        .filter_map(|result| match &result.reaction {
            BackendReaction::Emoji(emoticon) => Some(Reaction {
                reaction: emoticon.clone(),
                count: result.count,
            }),
            BackendReaction::CustomEmoji(_) | BackendReaction::Paid => None,
        })
        .collect()
}

pub fn image_url(host: &str, message_id: i32) -> String {
    format!("{}/api/v1/posts/images/{}", host, message_id)
}

pub fn video_url(host: &str, message_id: i32) -> String {
    format!("{}/api/v1/posts/videos/{}", host, message_id)
}

/// Builds a post from the messages of one group.
///
/// The first message with text is the caption; the first message carrying a
/// document is the media. Without a caption there is no post.
///
/// # Arguments
///
/// * `messages` - Messages of one group, in the order they should be scanned
/// * `parser` - Caption parser used for `parsed_content`
/// * `host` - Public base URL for media links
pub fn create_post_from_messages(
    messages: &[RawMessage],
    parser: &dyn CaptionParser,
    host: &str,
) -> Option<Post> {
    let info = messages.iter().find(|m| m.has_text())?;
    let media = messages.iter().find(|m| m.is_document());

    let mut post = Post {
        message_id: info.id,
        grouped_id: info.grouped_id,
        date: DateTime::from_timestamp(info.date, 0).unwrap_or_default(),
        author: info.post_author.clone().unwrap_or_default(),
        original_content: info.text.clone(),
        parsed_content: parser.parse(&info.text),
        reactions: extract_reactions(&info.reactions),
        image_url: Some(image_url(host, info.id)),
        video_url: None,
        document_id: None,
        document_size: None,
        document_message_id: None,
    };

    if let Some(media) = media {
        if let Some(document) = media.document() {
            post.document_id = Some(document.id);
            post.document_size = Some(document.size);
        }
        post.document_message_id = Some(media.id);
        post.video_url = Some(video_url(host, media.id));
    }

    Some(post)
}
