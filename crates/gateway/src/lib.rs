//! Realtime presence and notification gateway.
//!
//! This service:
//! - Accepts WebSocket connections from marketplace users and guests
//! - Derives per-principal presence from live connection counts
//! - Keeps a bounded recent-notification feed per connected principal
//! - Fans presence transitions and new notifications out to subscribers
//!
//! ## Architecture
//!
//! ```text
//! POST /notifications (backend business events)
//!         ↓
//! NotificationStore (durable history + bounded feed cache)
//!         ↓
//! DeliveryBroker (scope indexes, bounded per-connection queues)
//!         ↓
//! WebSocket clients (private scope) + guests (public presence)
//! ```
//!
//! ## Delivery semantics
//!
//! - Fan-out is best-effort: no replay, no acks. Clients reconcile via
//!   `GET /presence` and `GET /notifications` after a reconnect.
//! - Per-scope publish order equals per-connection delivery order.
//! - A slow consumer is dropped, never waited on.

pub mod api;
pub mod auth;
pub mod broker;
pub mod error;
pub mod feed;
pub mod history;
pub mod presence;
pub mod store;
pub mod ws_server;

pub use api::create_router;
pub use auth::{CredentialVerifier, JwtVerifier, Principal};
pub use broker::{DeliveryBroker, Scope, CONNECTION_QUEUE_SIZE};
pub use error::{GatewayError, Result};
pub use feed::{NotificationFeed, FEED_CAPACITY};
pub use history::{MemoryHistory, NotificationHistory};
pub use presence::{ConnectionId, PresenceChange, PresenceRegistry};
pub use store::NotificationStore;
pub use ws_server::AppState;
