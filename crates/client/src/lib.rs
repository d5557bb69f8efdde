//! Reconnecting client for the pulse realtime gateway.
//!
//! Wraps the WebSocket channel with keepalive, exponential-backoff
//! reconnection, and the reconciliation calls the gateway's no-replay
//! delivery model requires after every reconnect.

pub mod error;
pub mod handler;
pub mod manager;
pub mod messages;

pub use error::Error;
pub use handler::FeedHandler;
pub use manager::{FeedClient, FeedClientConfig};
pub use messages::ControlCommand;
