//! Notification store: durable history fronted by bounded feed caches.
//!
//! Every write goes to the durable [`NotificationHistory`] first; the
//! in-memory feed cache is only touched after the durable write succeeds,
//! so the service never advertises a notification that failed to persist.
//! Feeds are cached only for principals with a live session (loaded on
//! first connect, dropped on last disconnect).

use crate::error::Result;
use crate::feed::{NotificationFeed, FEED_CAPACITY};
use crate::history::NotificationHistory;
use chrono::Utc;
use common::protocol::NotificationPage;
use common::types::{Notification, NotificationId, NotificationPayload, PrincipalId};
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Hard ceiling on a single history page.
pub const MAX_PAGE_SIZE: usize = 100;

/// Store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub loaded_feeds: usize,
    pub appended_total: u64,
    pub evicted_total: u64,
}

/// Per-principal notification state over a durable history collaborator.
pub struct NotificationStore {
    history: Arc<dyn NotificationHistory>,
    feeds: DashMap<PrincipalId, Mutex<NotificationFeed>>,
    capacity: usize,
    appended_total: AtomicU64,
    evicted_total: AtomicU64,
}

impl NotificationStore {
    /// Create a store with the default feed capacity.
    pub fn new(history: Arc<dyn NotificationHistory>) -> Self {
        Self::with_capacity(history, FEED_CAPACITY)
    }

    /// Create a store with an explicit feed capacity.
    pub fn with_capacity(history: Arc<dyn NotificationHistory>, capacity: usize) -> Self {
        Self {
            history,
            feeds: DashMap::new(),
            capacity,
            appended_total: AtomicU64::new(0),
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Create a durable notification for `owner_id`, then update their
    /// cached feed if one is loaded.
    ///
    /// A history failure propagates to the caller and leaves the cache
    /// untouched. Owners with no loaded feed get the durable write only;
    /// they converge on next connect or via [`Self::list_page`].
    pub async fn append(
        &self,
        owner_id: &str,
        payload: NotificationPayload,
    ) -> Result<Notification> {
        let created_at = Utc::now().timestamp_millis();
        let notification = self.history.insert(owner_id, payload, created_at).await?;

        self.appended_total.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_notifications_appended_total").increment(1);

        if let Some(feed) = self.feeds.get(owner_id) {
            let evicted = feed.lock().unwrap().push(notification.clone());
            if evicted.is_some() {
                self.evicted_total.fetch_add(1, Ordering::Relaxed);
                counter!("gateway_notifications_evicted_total").increment(1);
            }
        }

        Ok(notification)
    }

    /// Snapshot the owner's feed, lazily populating the cache from durable
    /// history on first use.
    ///
    /// Returns the feed contents newest-first plus the unread count.
    pub async fn load_feed(&self, owner_id: &str) -> Result<(Vec<Notification>, usize)> {
        if let Some(feed) = self.feeds.get(owner_id) {
            let feed = feed.lock().unwrap();
            return Ok((feed.snapshot(), feed.unread_count()));
        }

        let page = self.history.page(owner_id, self.capacity, None).await?;
        let feed = NotificationFeed::from_history(self.capacity, page.items);
        let snapshot = (feed.snapshot(), feed.unread_count());
        // An append racing this load still reaches the client through the
        // broker push; the cache keeps whichever entry landed first.
        self.feeds
            .entry(owner_id.to_string())
            .or_insert_with(|| Mutex::new(feed));
        Ok(snapshot)
    }

    /// Drop the owner's cached feed (their last connection closed).
    pub fn unload_feed(&self, owner_id: &str) {
        self.feeds.remove(owner_id);
    }

    /// Read a page of durable history, independent of the bounded cache.
    pub async fn list_page(
        &self,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<NotificationPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let page = self.history.page(owner_id, limit, cursor).await?;
        Ok(NotificationPage {
            items: page.items,
            next_cursor: page.next_cursor,
        })
    }

    /// Mark owned notifications read, durably and in the cached feed.
    ///
    /// Ids that are unknown, already read, or owned by someone else are
    /// skipped; the returned vec holds exactly the ids that flipped. An
    /// empty id set short-circuits without a store round trip.
    pub async fn mark_read(
        &self,
        owner_id: &str,
        ids: &HashSet<NotificationId>,
    ) -> Result<Vec<NotificationId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let updated = self.history.mark_read(owner_id, ids).await?;
        if !updated.is_empty() {
            if let Some(feed) = self.feeds.get(owner_id) {
                let updated_set: HashSet<NotificationId> = updated.iter().copied().collect();
                feed.lock().unwrap().mark_read(&updated_set);
            }
            counter!("gateway_notifications_read_total").increment(updated.len() as u64);
        }
        Ok(updated)
    }

    /// Unread count for a principal with a loaded feed.
    pub fn unread_count(&self, owner_id: &str) -> Option<usize> {
        self.feeds
            .get(owner_id)
            .map(|feed| feed.lock().unwrap().unread_count())
    }

    /// Store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            loaded_feeds: self.feeds.len(),
            appended_total: self.appended_total.load(Ordering::Relaxed),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }
}
