//! Delivery broker: fans presence and notification events out to
//! subscribed connections.
//!
//! Uses lock-free DashMap indexes per scope. Delivery is fire-and-forget
//! over each connection's bounded outbound queue: a connection whose queue
//! is full is dropped from every scope rather than stalling the publisher,
//! and observes the closed channel as a normal teardown. Events published
//! to one scope reach each subscribed connection in publish order; there is
//! no ordering guarantee across scopes.

use crate::error::{GatewayError, Result};
use crate::presence::ConnectionId;
use axum::extract::ws::Message;
use common::protocol::ServerMessage;
use dashmap::{DashMap, DashSet};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Outbound queue depth per connection. A consumer this far behind a
/// 30s-ping cadence is not coming back.
pub const CONNECTION_QUEUE_SIZE: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<Message>,
    principal: Option<String>,
}

/// Delivery scope for published events.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// The aggregate presence channel; carries no private data.
    Public,
    /// Events belonging to a single principal.
    Private(&'a str),
}

/// Scope-indexed fan-out over per-connection outbound queues.
///
/// The broker owns the only sender for each connection, so removing a
/// subscriber closes its queue and lets the connection's forward task shut
/// the socket down.
pub struct DeliveryBroker {
    connections: DashMap<ConnectionId, Subscriber>,
    public: DashSet<ConnectionId>,
    private: DashMap<String, DashSet<ConnectionId>>,
}

impl DeliveryBroker {
    /// Create a new empty broker.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            public: DashSet::new(),
            private: DashMap::new(),
        }
    }

    /// Register a connection's outbound queue.
    pub fn register(&self, connection_id: ConnectionId, tx: mpsc::Sender<Message>) {
        self.connections.insert(
            connection_id,
            Subscriber {
                tx,
                principal: None,
            },
        );
    }

    /// Subscribe a connection to the public presence channel.
    pub fn subscribe_public(&self, connection_id: &ConnectionId) {
        if self.connections.contains_key(connection_id) {
            self.public.insert(*connection_id);
        }
    }

    /// Subscribe a connection to a principal's private events.
    pub fn subscribe_private(&self, connection_id: &ConnectionId, principal_id: &str) {
        if let Some(mut subscriber) = self.connections.get_mut(connection_id) {
            subscriber.principal = Some(principal_id.to_string());
            self.private
                .entry(principal_id.to_string())
                .or_default()
                .insert(*connection_id);
        }
    }

    /// Remove a connection from every index and close its queue.
    /// Repeating the call is a no-op.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        if let Some((_, subscriber)) = self.connections.remove(connection_id) {
            self.public.remove(connection_id);
            if let Some(principal_id) = subscriber.principal {
                if let Some(set) = self.private.get(&principal_id) {
                    set.remove(connection_id);
                }
                self.private.remove_if(&principal_id, |_, set| set.is_empty());
            }
            debug!("Connection {} unregistered from broker", connection_id);
        }
    }

    /// Fan an event out to every connection in scope.
    ///
    /// Best-effort: the publisher never blocks, and a connection whose
    /// queue is full is dropped as if it had disconnected. Missed events
    /// are reconciled by the client on reconnect.
    pub fn publish(&self, scope: Scope<'_>, msg: &ServerMessage) {
        let targets: Vec<ConnectionId> = match scope {
            Scope::Public => self.public.iter().map(|c| *c).collect(),
            Scope::Private(principal_id) => self
                .private
                .get(principal_id)
                .map(|set| set.iter().map(|c| *c).collect())
                .unwrap_or_default(),
        };
        if targets.is_empty() {
            return;
        }

        // Pre-serialize the event once for the whole fan-out.
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                return;
            }
        };

        for connection_id in targets {
            let overflowed = match self.connections.get(&connection_id) {
                Some(subscriber) => {
                    match subscriber.tx.try_send(Message::Text(json.clone().into())) {
                        Ok(()) => false,
                        Err(TrySendError::Full(_)) => true,
                        // Forward task already gone; clean the indexes up.
                        Err(TrySendError::Closed(_)) => true,
                    }
                }
                None => false,
            };

            if overflowed {
                warn!("Dropping slow connection {}", connection_id);
                counter!("gateway_overflow_drops_total").increment(1);
                self.unregister(&connection_id);
            }
        }

        counter!("gateway_events_published_total").increment(1);
    }

    /// Send an event to a single connection.
    pub fn send_to(&self, connection_id: &ConnectionId, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.send_raw(connection_id, Message::Text(json.into()))
    }

    /// Send a raw WebSocket frame (pings, pongs) to a single connection.
    pub fn send_raw(&self, connection_id: &ConnectionId, msg: Message) -> Result<()> {
        let subscriber = self
            .connections
            .get(connection_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(connection_id.to_string()))?;
        subscriber
            .tx
            .try_send(msg)
            .map_err(|_| GatewayError::ChannelSend)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections on the public channel.
    pub fn public_count(&self) -> usize {
        self.public.len()
    }

    /// Number of principals with at least one private subscription.
    pub fn private_scope_count(&self) -> usize {
        self.private.len()
    }
}

impl Default for DeliveryBroker {
    fn default() -> Self {
        Self::new()
    }
}
