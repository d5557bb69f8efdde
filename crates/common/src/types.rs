//! Principal and notification schema.

use serde::{Deserialize, Serialize};

/// Opaque principal (user) identifier. Issued by the marketplace backend;
/// the realtime service references it but never creates one.
pub type PrincipalId = String;

/// Unique notification identifier. Monotonic per store, so sorting by id
/// equals sorting by creation order.
pub type NotificationId = u64;

/// Role carried by an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Freelancer,
    Admin,
}

/// Business event category for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPlaced,
    OrderCompleted,
    MessageReceived,
    ReviewReceived,
    SellerApproved,
    Generic,
}

/// Payload attached to a notification: category plus free-form event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    /// Kind-specific data (order id, sender name, ...). Opaque to the
    /// realtime service.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NotificationPayload {
    /// Payload with no attached data.
    pub fn bare(kind: NotificationKind) -> Self {
        Self {
            kind,
            data: serde_json::Value::Null,
        }
    }
}

/// A single notification owned by a principal.
///
/// Created by server-side business events. Only the read flag mutates after
/// creation; notifications are never deleted, only aged out of bounded
/// feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub owner_id: PrincipalId,
    pub payload: NotificationPayload,
    /// Creation time in epoch milliseconds.
    pub created_at: i64,
    pub read: bool,
}
