//! Durable notification history collaborator.
//!
//! The gateway treats persistence as an external black box behind
//! [`NotificationHistory`]: insert, newest-first paging, and read-state
//! updates, all keyed by owner. [`MemoryHistory`] is the in-process
//! implementation used by tests and single-node deployments.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use common::types::{Notification, NotificationId, NotificationPayload, PrincipalId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// One page of history plus the cursor for the page after it.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Notifications, newest first.
    pub items: Vec<Notification>,
    /// Opaque token resuming after the last item; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// Durable store collaborator boundary.
#[async_trait]
pub trait NotificationHistory: Send + Sync {
    /// Persist a new notification and return it with its assigned id.
    /// Assigned ids are monotonic, so id order equals creation order.
    async fn insert(
        &self,
        owner_id: &str,
        payload: NotificationPayload,
        created_at: i64,
    ) -> Result<Notification>;

    /// Read a page of the owner's history, newest-first. `cursor` is an
    /// opaque token returned by a previous page.
    async fn page(
        &self,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<HistoryPage>;

    /// Set `read = true` on the given ids where they exist, belong to
    /// `owner_id`, and are still unread. Returns the ids actually flipped;
    /// everything else is silently skipped.
    async fn mark_read(
        &self,
        owner_id: &str,
        ids: &HashSet<NotificationId>,
    ) -> Result<Vec<NotificationId>>;
}

/// Encode a history position as an opaque cursor token.
pub fn encode_cursor(id: NotificationId) -> String {
    format!("{:016x}", id)
}

/// Decode a cursor token produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> Result<NotificationId> {
    NotificationId::from_str_radix(cursor, 16)
        .map_err(|_| GatewayError::InvalidRequest(format!("bad cursor: {}", cursor)))
}

/// In-process history keyed by owner, ids from a shared sequence.
pub struct MemoryHistory {
    sequence: AtomicU64,
    by_owner: DashMap<PrincipalId, Vec<Notification>>,
}

impl MemoryHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            by_owner: DashMap::new(),
        }
    }

    /// Total notifications stored across all owners.
    pub fn len(&self) -> usize {
        self.by_owner.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationHistory for MemoryHistory {
    async fn insert(
        &self,
        owner_id: &str,
        payload: NotificationPayload,
        created_at: i64,
    ) -> Result<Notification> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let notification = Notification {
            id,
            owner_id: owner_id.to_string(),
            payload,
            created_at,
            read: false,
        };
        self.by_owner
            .entry(owner_id.to_string())
            .or_default()
            .push(notification.clone());
        Ok(notification)
    }

    async fn page(
        &self,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        let before = match cursor {
            Some(token) => decode_cursor(token)?,
            None => NotificationId::MAX,
        };

        let entry = match self.by_owner.get(owner_id) {
            Some(entry) => entry,
            None => {
                return Ok(HistoryPage {
                    items: Vec::new(),
                    next_cursor: None,
                })
            }
        };

        // Stored in ascending id order; walk backwards for newest-first.
        let mut items: Vec<Notification> = entry
            .value()
            .iter()
            .rev()
            .filter(|n| n.id < before)
            .take(limit + 1)
            .cloned()
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|n| encode_cursor(n.id))
        } else {
            None
        };

        Ok(HistoryPage { items, next_cursor })
    }

    async fn mark_read(
        &self,
        owner_id: &str,
        ids: &HashSet<NotificationId>,
    ) -> Result<Vec<NotificationId>> {
        let mut updated = Vec::new();
        if let Some(mut entry) = self.by_owner.get_mut(owner_id) {
            for notification in entry.value_mut().iter_mut() {
                if !notification.read && ids.contains(&notification.id) {
                    notification.read = true;
                    updated.push(notification.id);
                }
            }
        }
        Ok(updated)
    }
}
