//! Event handler trait for realtime feed consumers.

use crate::error::Result;
use async_trait::async_trait;
use common::protocol::{NotificationPage, ServerMessage};
use common::types::PrincipalId;

/// Trait that consumers implement to react to gateway events.
/// The [`crate::FeedClient`] calls these methods as events arrive.
#[async_trait]
pub trait FeedHandler: Send + Sync + 'static {
    /// Called for every decoded server event.
    async fn on_event(&self, event: ServerMessage) -> Result<()>;

    /// Called when the connection is lost (before the reconnect attempt).
    async fn on_disconnect(&self) {}

    /// Called with reconciled state after every successful (re)connect:
    /// the current public online set and, for authenticated clients, the
    /// newest history page. The gateway offers no replay, so this is the
    /// only way to repair a delivery gap.
    async fn on_reconcile(
        &self,
        online: Vec<PrincipalId>,
        page: Option<NotificationPage>,
    ) -> Result<()>;
}
