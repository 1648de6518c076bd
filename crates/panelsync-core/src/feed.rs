//! Bounded message feed shown on the messages page.
//!
//! Newest entries are at the front. When the feed grows past its capacity
//! the oldest entries are evicted from the back.
//!
//! Entries come from two disjoint sources, recorded in [`FeedOrigin`]:
//! messages synthesized locally after a successful action, and messages
//! delivered by the EBS messages poll. The poll never returns the local
//! confirmations, so no de-duplication key is needed as long as the two
//! sources stay separate.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ServerMessage;

/// Maximum entries kept in the feed.
pub const FEED_CAPACITY: usize = 50;

/// Where a feed entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedOrigin {
    /// Confirmation added by the panel after a successful action
    Local,
    /// Delivered by the EBS messages poll
    Server,
}

/// One line in the message feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFeedEntry {
    pub content: String,
    /// Free-form category (`chat` unless the server says otherwise)
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub origin: FeedOrigin,
}

/// Newest-first feed capped at [`FEED_CAPACITY`] entries.
#[derive(Debug, Clone)]
pub struct MessageFeed {
    entries: VecDeque<MessageFeedEntry>,
    capacity: usize,
}

impl MessageFeed {
    pub fn new() -> Self {
        Self::with_capacity(FEED_CAPACITY)
    }

    /// Create a feed with a custom capacity (at least one entry).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Prepend an entry stamped with `timestamp`, evicting the oldest if over
    /// capacity.
    pub fn append_at(
        &mut self,
        content: impl Into<String>,
        category: impl Into<String>,
        origin: FeedOrigin,
        timestamp: DateTime<Utc>,
    ) {
        self.entries.push_front(MessageFeedEntry {
            content: content.into(),
            category: category.into(),
            timestamp,
            origin,
        });
        self.entries.truncate(self.capacity);
    }

    /// Prepend an entry stamped now.
    pub fn append(
        &mut self,
        content: impl Into<String>,
        category: impl Into<String>,
        origin: FeedOrigin,
    ) {
        self.append_at(content, category, origin, Utc::now());
    }

    /// Add a batch from the messages poll, in server order; the last message
    /// of the batch ends up newest.
    pub fn append_server_batch(&mut self, messages: Vec<ServerMessage>, now: DateTime<Utc>) {
        for message in messages {
            self.append_at(message.content, message.category, FeedOrigin::Server, now);
        }
    }

    /// Entries newest-first
    pub fn entries(&self) -> impl Iterator<Item = &MessageFeedEntry> {
        self.entries.iter()
    }

    /// Owned copy of the entries, newest-first
    pub fn to_vec(&self) -> Vec<MessageFeedEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&MessageFeedEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessageFeed {
    fn default() -> Self {
        Self::new()
    }
}
