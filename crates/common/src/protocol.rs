//! WebSocket and REST protocol message types.
//!
//! Defines the JSON message format for client-server communication. Both
//! sides of the wire live in this crate, so every type derives both
//! `Serialize` and `Deserialize`.

use crate::types::{Notification, NotificationId, NotificationPayload, PrincipalId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Mark the given notification ids as read. Ids not owned by the
    /// sending principal are silently skipped.
    MarkRead { ids: Vec<NotificationId> },
    /// Ping message for keepalive.
    Ping,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current public online set. Sent on connect and after every presence
    /// transition.
    PresenceUpdate { online: Vec<PrincipalId> },
    /// Bounded recent-notification snapshot, newest first. Sent once after
    /// an authenticated connection joins its private scope.
    FeedSnapshot {
        items: Vec<Notification>,
        unread_count: usize,
    },
    /// A newly created notification for the receiving principal.
    NotificationNew { notification: Notification },
    /// Read-state change echoed to all of the owner's connections.
    NotificationRead {
        ids: Vec<NotificationId>,
        updated: usize,
    },
    /// Pong response to ping.
    Pong,
    /// Error message. Malformed requests are answered with this, never by
    /// closing the connection.
    Error { message: String, code: String },
}

// ============================================================================
// REST payloads
// ============================================================================

/// One page of durable notification history, newest-first.
/// Response body for `GET /notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    /// Opaque cursor for the next page; absent when history is exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Request body for `PATCH /notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub ids: Vec<NotificationId>,
}

/// Response body for `PATCH /notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

/// Request body for `POST /notifications` (internal ingest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub owner_id: PrincipalId,
    pub payload: NotificationPayload,
}

/// Response body for `GET /presence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub online: Vec<PrincipalId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_tag() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"mark_read","ids":[3,7]}"#).unwrap();
        match msg {
            ClientMessage::MarkRead { ids } => assert_eq!(ids, vec![3, 7]),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_wire_tag() {
        let json = serde_json::to_string(&ServerMessage::PresenceUpdate {
            online: vec!["u1".to_string()],
        })
        .unwrap();
        assert!(json.contains(r#""type":"presence_update""#));
        assert!(json.contains(r#""online":["u1"]"#));
    }
}
