//! Bounded per-principal notification feed.
//!
//! Fixed-capacity ring buffer over the most recent notifications, newest
//! first, with a maintained unread counter. Eviction is by recency only:
//! an unread notification at the tail ages out exactly like a read one.

use common::types::{Notification, NotificationId};
use std::collections::{HashSet, VecDeque};

/// Default feed capacity.
pub const FEED_CAPACITY: usize = 50;

/// Fixed-capacity, newest-first feed of recent notifications.
///
/// Invariants: `len() <= capacity`, and `unread_count()` always equals the
/// number of entries with `read == false`.
#[derive(Debug)]
pub struct NotificationFeed {
    items: VecDeque<Notification>,
    capacity: usize,
    unread: usize,
}

impl NotificationFeed {
    /// Create an empty feed. Capacity must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "feed capacity must be positive");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            unread: 0,
        }
    }

    /// Build a feed from a newest-first history slice, keeping at most
    /// `capacity` entries.
    pub fn from_history(capacity: usize, items: Vec<Notification>) -> Self {
        let mut feed = Self::new(capacity);
        for notification in items.into_iter().take(capacity) {
            if !notification.read {
                feed.unread += 1;
            }
            feed.items.push_back(notification);
        }
        feed
    }

    /// Prepend a notification, evicting the oldest entry at capacity.
    /// Returns the evicted notification, if any. O(1).
    pub fn push(&mut self, notification: Notification) -> Option<Notification> {
        let evicted = if self.items.len() == self.capacity {
            let evicted = self.items.pop_back();
            if let Some(ref n) = evicted {
                if !n.read {
                    self.unread -= 1;
                }
            }
            evicted
        } else {
            None
        };

        if !notification.read {
            self.unread += 1;
        }
        self.items.push_front(notification);
        evicted
    }

    /// Mark the given ids read in place. Returns how many entries actually
    /// flipped from unread to read; already-read entries never double-count.
    pub fn mark_read(&mut self, ids: &HashSet<NotificationId>) -> usize {
        let mut updated = 0;
        for notification in self.items.iter_mut() {
            if !notification.read && ids.contains(&notification.id) {
                notification.read = true;
                self.unread -= 1;
                updated += 1;
            }
        }
        updated
    }

    /// Number of unread entries currently in the feed.
    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Clone the feed contents, newest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{NotificationKind, NotificationPayload};

    fn notification(id: NotificationId) -> Notification {
        Notification {
            id,
            owner_id: "u1".to_string(),
            payload: NotificationPayload::bare(NotificationKind::Generic),
            created_at: id as i64,
            read: false,
        }
    }

    fn ids(feed: &NotificationFeed) -> Vec<NotificationId> {
        feed.snapshot().iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let cap = 5;
        let mut feed = NotificationFeed::new(cap);
        for id in 1..=(cap as u64 + 1) {
            feed.push(notification(id));
        }
        assert_eq!(feed.len(), cap);
        // Newest-first, oldest (id 1) evicted.
        assert_eq!(ids(&feed), vec![6, 5, 4, 3, 2]);
    }

    #[test]
    fn test_eviction_ignores_read_state() {
        let mut feed = NotificationFeed::new(2);
        feed.push(notification(1));
        feed.push(notification(2));
        // The oldest is unread; it is still the one evicted.
        let evicted = feed.push(notification(3)).unwrap();
        assert_eq!(evicted.id, 1);
        assert_eq!(feed.unread_count(), 2);
    }

    #[test]
    fn test_unread_count_matches_recount_and_mark_read_is_idempotent() {
        let mut feed = NotificationFeed::new(10);
        for id in 1..=4 {
            feed.push(notification(id));
        }
        assert_eq!(feed.unread_count(), 4);

        let to_read: HashSet<_> = [2, 3].into_iter().collect();
        assert_eq!(feed.mark_read(&to_read), 2);
        assert_eq!(feed.unread_count(), 2);

        // Second call with the same set flips nothing.
        assert_eq!(feed.mark_read(&to_read), 0);
        assert_eq!(feed.unread_count(), 2);

        let recount = feed.snapshot().iter().filter(|n| !n.read).count();
        assert_eq!(feed.unread_count(), recount);
    }

    #[test]
    fn test_mark_read_on_evicted_id_is_zero_not_error() {
        let mut feed = NotificationFeed::new(2);
        feed.push(notification(1)); // "a"
        feed.push(notification(2)); // "b"
        feed.push(notification(3)); // "c" evicts "a"
        assert_eq!(ids(&feed), vec![3, 2]);

        let gone: HashSet<_> = [1].into_iter().collect();
        assert_eq!(feed.mark_read(&gone), 0);
        assert_eq!(feed.unread_count(), 2);
    }

    #[test]
    fn test_from_history_counts_unread_and_truncates() {
        let mut items: Vec<_> = (1..=6).rev().map(notification).collect();
        items[0].read = true; // newest already read
        let feed = NotificationFeed::from_history(4, items);
        assert_eq!(feed.len(), 4);
        assert_eq!(ids(&feed), vec![6, 5, 4, 3]);
        assert_eq!(feed.unread_count(), 3);
    }
}
