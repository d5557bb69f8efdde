//! Shared types for the pulse realtime service.
//!
//! Defines the principal/notification schema and the JSON protocol spoken
//! between the gateway and its WebSocket/HTTP clients.

pub mod protocol;
pub mod types;

pub use protocol::{
    AppendRequest, ClientMessage, MarkReadRequest, MarkReadResponse, NotificationPage,
    PresenceSnapshot, ServerMessage,
};
pub use types::{
    Notification, NotificationId, NotificationKind, NotificationPayload, PrincipalId, Role,
};
