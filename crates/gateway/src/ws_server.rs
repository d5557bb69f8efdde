//! WebSocket session gateway using Axum.
//!
//! Per-connection lifecycle: authenticate (before the upgrade completes),
//! register the outbound queue with the broker, join scopes and presence,
//! then pump inbound frames until the socket dies. Cleanup runs on every
//! exit path, so presence and broker state never outlive the transport.

use crate::auth::{CredentialVerifier, Principal};
use crate::broker::{DeliveryBroker, Scope, CONNECTION_QUEUE_SIZE};
use crate::error::{GatewayError, Result};
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::store::NotificationStore;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use common::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    pub presence: Arc<PresenceRegistry>,
    pub store: Arc<NotificationStore>,
    pub broker: Arc<DeliveryBroker>,
    pub verifier: Arc<dyn CredentialVerifier>,
}

/// Query parameters accepted on the upgrade request. Browsers cannot set
/// headers on WebSocket requests, so the token rides the query string.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// A missing token means a guest connection (public presence only). An
/// invalid token rejects the upgrade outright: the transport closes before
/// any presence or broker state exists.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let principal = match query.token.as_deref() {
        Some(token) => match state.verifier.verify(token) {
            Ok(principal) => Some(principal),
            Err(e) => {
                counter!("gateway_auth_failures_total").increment(1);
                warn!("Rejected connection: {}", e);
                return StatusCode::UNAUTHORIZED.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, principal))
        .into_response()
}

/// Handle an upgraded WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, principal: Option<Principal>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let connection_id: ConnectionId = Uuid::new_v4();

    // The broker holds the only sender: dropping the subscriber (teardown
    // or overflow) closes the queue, the forward task shuts the socket.
    let (tx, mut rx) = mpsc::channel::<Message>(CONNECTION_QUEUE_SIZE);
    state.broker.register(connection_id, tx);
    state.broker.subscribe_public(&connection_id);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.broker.connection_count() as f64);

    if let Some(ref principal) = principal {
        state
            .broker
            .subscribe_private(&connection_id, &principal.id);

        if let Some(change) = state
            .presence
            .connect(&principal.id, principal.role, connection_id)
        {
            debug!("Presence change: {:?}", change);
            publish_presence(&state);
        }

        // Bounded recent feed, lazily loaded from durable history.
        match state.store.load_feed(&principal.id).await {
            Ok((items, unread_count)) => {
                let _ = state.broker.send_to(
                    &connection_id,
                    &ServerMessage::FeedSnapshot {
                        items,
                        unread_count,
                    },
                );
            }
            Err(e) => warn!("Failed to load feed for {}: {}", principal.id, e),
        }

        info!("Principal {} connected ({})", principal.id, connection_id);
    } else {
        debug!("Guest connection {}", connection_id);
    }

    // Every connection starts from the current public set.
    let _ = state.broker.send_to(
        &connection_id,
        &ServerMessage::PresenceUpdate {
            online: state.presence.online_freelancers(),
        },
    );

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if let Err(e) =
                            handle_message(&state, &connection_id, principal.as_ref(), msg).await
                        {
                            // Malformed requests get an error frame, never
                            // a closed connection.
                            warn!("Error handling message on {}: {:?}", connection_id, e);
                            let _ = state.broker.send_to(&connection_id, &ServerMessage::Error {
                                message: e.to_string(),
                                code: "bad_request".to_string(),
                            });
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {:?}", connection_id, e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                // Fails once the broker has dropped this connection.
                if state.broker.send_raw(&connection_id, Message::Ping(vec![].into())).is_err() {
                    break;
                }
            }
        }
    }

    // Cleanup on every exit path, abnormal termination included.
    state.broker.unregister(&connection_id);
    if let Some(ref principal) = principal {
        if let Some(change) = state.presence.disconnect(&principal.id, &connection_id) {
            debug!("Presence change: {:?}", change);
            state.store.unload_feed(&principal.id);
            publish_presence(&state);
        }
    }
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.broker.connection_count() as f64);

    info!("Connection {} closed", connection_id);
}

/// Push the current public online set to the public channel.
pub fn publish_presence(state: &AppState) {
    gauge!("gateway_presence_online").set(state.presence.online_count() as f64);
    state.broker.publish(
        Scope::Public,
        &ServerMessage::PresenceUpdate {
            online: state.presence.online_freelancers(),
        },
    );
}

/// Handle a single WebSocket frame.
async fn handle_message(
    state: &Arc<AppState>,
    connection_id: &ConnectionId,
    principal: Option<&Principal>,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = serde_json::from_str(&text)?;
            handle_client_message(state, connection_id, principal, client_msg).await
        }
        Message::Binary(data) => {
            let client_msg: ClientMessage = serde_json::from_slice(&data)?;
            handle_client_message(state, connection_id, principal, client_msg).await
        }
        Message::Ping(data) => state.broker.send_raw(connection_id, Message::Pong(data)),
        Message::Pong(_) => Ok(()),
        Message::Close(_) => Ok(()),
    }
}

/// Handle a parsed client message.
async fn handle_client_message(
    state: &Arc<AppState>,
    connection_id: &ConnectionId,
    principal: Option<&Principal>,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::MarkRead { ids } => {
            let principal = principal.ok_or_else(|| {
                GatewayError::InvalidRequest("mark_read requires authentication".to_string())
            })?;

            let ids: HashSet<_> = ids.into_iter().collect();
            let updated = state.store.mark_read(&principal.id, &ids).await?;

            // Echo to every one of the owner's connections so other tabs
            // converge without a refetch.
            state.broker.publish(
                Scope::Private(&principal.id),
                &ServerMessage::NotificationRead {
                    updated: updated.len(),
                    ids: updated,
                },
            );
            Ok(())
        }
        ClientMessage::Ping => state.broker.send_to(connection_id, &ServerMessage::Pong),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::history::MemoryHistory;
    use common::types::{NotificationKind, NotificationPayload, Role};

    fn app_state() -> Arc<AppState> {
        let history = Arc::new(MemoryHistory::new());
        Arc::new(AppState {
            presence: Arc::new(PresenceRegistry::new()),
            store: Arc::new(NotificationStore::new(history)),
            broker: Arc::new(DeliveryBroker::new()),
            verifier: Arc::new(JwtVerifier::new("test-secret")),
        })
    }

    fn attach(state: &AppState, principal_id: Option<&str>) -> (ConnectionId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let connection_id = Uuid::new_v4();
        state.broker.register(connection_id, tx);
        state.broker.subscribe_public(&connection_id);
        if let Some(id) = principal_id {
            state.broker.subscribe_private(&connection_id, id);
        }
        (connection_id, rx)
    }

    fn recv_text(rx: &mut mpsc::Receiver<Message>) -> String {
        match rx.try_recv().unwrap() {
            Message::Text(text) => text.to_string(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mark_read_updates_store_and_echoes_to_all_tabs() {
        let state = app_state();
        let appended = state
            .store
            .append("u1", NotificationPayload::bare(NotificationKind::OrderPlaced))
            .await
            .unwrap();
        state.store.load_feed("u1").await.unwrap();

        let principal = Principal {
            id: "u1".to_string(),
            role: Role::Freelancer,
        };
        let (conn_a, mut rx_a) = attach(&state, Some("u1"));
        let (_conn_b, mut rx_b) = attach(&state, Some("u1"));

        handle_client_message(
            &state,
            &conn_a,
            Some(&principal),
            ClientMessage::MarkRead {
                ids: vec![appended.id, 999],
            },
        )
        .await
        .unwrap();

        assert_eq!(state.store.unread_count("u1"), Some(0));

        // Both of the owner's connections get the echo, including the one
        // that sent the request.
        for rx in [&mut rx_a, &mut rx_b] {
            let echo = recv_text(rx);
            assert!(echo.contains("notification_read"));
            assert!(echo.contains(r#""updated":1"#));
        }
    }

    #[tokio::test]
    async fn test_guest_mark_read_is_rejected_without_closing() {
        let state = app_state();
        let (conn, _rx) = attach(&state, None);

        let err = handle_client_message(
            &state,
            &conn,
            None,
            ClientMessage::MarkRead { ids: vec![1] },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        // The connection is still registered; only the request failed.
        assert_eq!(state.broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_ping_gets_pong_on_same_connection() {
        let state = app_state();
        let (conn, mut rx) = attach(&state, None);

        handle_client_message(&state, &conn, None, ClientMessage::Ping)
            .await
            .unwrap();

        assert!(recv_text(&mut rx).contains("pong"));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_an_error_not_a_close() {
        let state = app_state();
        let (conn, _rx) = attach(&state, None);

        let err = handle_message(&state, &conn, None, Message::Text("not json".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Json(_)));
        assert_eq!(state.broker.connection_count(), 1);
    }
}
