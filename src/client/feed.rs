//! Merged notification view
//!
//! Replies and broadcasts from both subscriptions land in one list ordered by
//! timestamp, oldest first, holding only the most recent entries.

use super::consumer::NotificationHandler;
use crate::protocol::Notification;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_FEED_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub notification: Notification,
    /// Producer timestamp, or receive time when the producer sent none
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NotificationFeed {
    capacity: usize,
    entries: Vec<FeedEntry>,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity.saturating_add(1)),
        }
    }

    pub fn push(&mut self, notification: Notification) {
        self.push_received_at(notification, Utc::now());
    }

    /// Insert, re-sort ascending and keep the newest `capacity` entries
    ///
    /// The sort is stable: entries with equal timestamps keep arrival order.
    pub fn push_received_at(&mut self, notification: Notification, received_at: DateTime<Utc>) {
        let timestamp = notification.timestamp().unwrap_or(received_at);
        self.entries.push(FeedEntry {
            notification,
            timestamp,
        });
        self.entries.sort_by_key(|entry| entry.timestamp);

        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
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

    pub fn latest(&self) -> Option<&FeedEntry> {
        self.entries.last()
    }

    /// Handler that logs each notification and records it in `feed`
    pub fn handler(feed: Arc<Mutex<NotificationFeed>>) -> NotificationHandler {
        Arc::new(move |notification: Notification| {
            info!(
                kind = notification.kind().map(|kind| kind.as_str()).unwrap_or("unknown"),
                correlation_id = notification.correlation_id().unwrap_or("-"),
                broadcast = notification.is_broadcast(),
                "Notification: {}",
                notification.message().unwrap_or("")
            );
            feed.lock().push(notification);
        })
    }
}
