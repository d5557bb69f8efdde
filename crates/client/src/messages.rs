//! Control messages for a running feed client.

use common::types::NotificationId;

/// Commands that can be sent to a [`crate::FeedClient`] at runtime.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    /// Mark notification ids as read
    MarkRead(Vec<NotificationId>),
    /// Graceful shutdown
    Shutdown,
}
