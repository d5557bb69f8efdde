//! WebSocket feed client with ping/pong, reconnection, and explicit
//! reconcile-on-reconnect.
//!
//! The gateway does not replay missed events, so after every successful
//! (re)connect the client fetches the public presence snapshot and the
//! newest history page over HTTP and hands both to the handler before any
//! live events are delivered.

use crate::error::{Error, Result};
use crate::handler::FeedHandler;
use crate::messages::ControlCommand;
use common::protocol::{ClientMessage, NotificationPage, PresenceSnapshot, ServerMessage};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// WebSocket endpoint (e.g., "wss://rt.example.com/ws").
    pub ws_url: String,
    /// HTTP base URL for reconciliation calls (e.g., "https://rt.example.com").
    pub http_url: String,
    /// Bearer token; `None` connects as a guest (public presence only).
    pub token: Option<String>,
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Initial delay before reconnection attempt.
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay (for exponential backoff).
    pub max_reconnect_delay: Duration,
    /// History page size fetched during reconciliation.
    pub history_page_limit: usize,
    /// Label for logs and metrics.
    pub label: String,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8082/ws".to_string(),
            http_url: "http://localhost:8082".to_string(),
            token: None,
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            history_page_limit: 50,
            label: "feed".to_string(),
        }
    }
}

/// Build the upgrade URL, attaching the bearer token as a query pair.
fn ws_url_with_token(base: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base)?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Reconnecting WebSocket feed client.
/// Handles connection lifecycle, ping/pong, reconciliation, and runtime
/// mark-read commands.
pub struct FeedClient<H: FeedHandler> {
    handler: Arc<H>,
    config: FeedClientConfig,
    command_rx: mpsc::Receiver<ControlCommand>,
    http: reqwest::Client,
}

impl<H: FeedHandler> FeedClient<H> {
    /// Create a new feed client.
    pub fn new(handler: H, config: FeedClientConfig, command_rx: mpsc::Receiver<ControlCommand>) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            command_rx,
            http: reqwest::Client::new(),
        }
    }

    /// Run the client. This will reconnect on disconnection until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let mut reconnect_delay = self.config.reconnect_delay;
        let mut shutdown = false;

        while !shutdown {
            match self.connect_and_run_loop(&mut shutdown).await {
                Ok(()) => {
                    info!("[{}] WebSocket closed gracefully", self.config.label);
                    break;
                }
                Err(e) => {
                    counter!("feed_client_disconnects_total").increment(1);
                    warn!(
                        "[{}] WebSocket disconnected: {:?}, reconnecting in {:?}",
                        self.config.label, e, reconnect_delay
                    );
                    self.handler.on_disconnect().await;

                    tokio::time::sleep(reconnect_delay).await;

                    // Exponential backoff
                    reconnect_delay = (reconnect_delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }

        gauge!("feed_client_connected").set(0.0);
        Ok(())
    }

    async fn connect_and_run_loop(&mut self, shutdown: &mut bool) -> Result<()> {
        let url = ws_url_with_token(&self.config.ws_url, self.config.token.as_deref())?;
        info!("[{}] Connecting to WebSocket: {}", self.config.label, self.config.ws_url);

        let host = url
            .host_str()
            .ok_or_else(|| Error::Generic("No host in URL".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(443);
        let addr_str = format!("{}:{}", host, port);

        // Resolve DNS and prefer IPv4 to avoid IPv6 timeout issues
        let addrs: Vec<SocketAddr> = addr_str
            .to_socket_addrs()
            .map_err(|e| Error::Generic(format!("DNS resolution failed: {}", e)))?
            .collect();

        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        // Connect to the first available address
        let mut tcp_stream = None;
        for addr in &sorted_addrs {
            debug!("[{}] Trying to connect to {}", self.config.label, addr);
            match tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    tcp_stream = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("[{}] TCP connect to {} failed: {}", self.config.label, addr, e);
                }
                Err(_) => {
                    debug!("[{}] TCP connect to {} timed out", self.config.label, addr);
                }
            }
        }

        let tcp_stream = tcp_stream
            .ok_or_else(|| Error::Generic("All connection attempts failed".to_string()))?;

        // WebSocket handshake with TLS support (plain ws:// skips the
        // connector).
        let mut root_store = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            let _ = root_store.add(cert);
        }

        let connector = Connector::Rustls(Arc::new(
            rustls::ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Generic(format!("TLS config error: {}", e)))?
            .with_root_certificates(root_store)
            .with_no_client_auth(),
        ));

        let (ws_stream, response) =
            client_async_tls_with_config(url.as_str(), tcp_stream, None, Some(connector)).await?;

        debug!(
            "[{}] WebSocket handshake complete, status: {:?}",
            self.config.label,
            response.status()
        );
        let (mut write, mut read) = ws_stream.split();

        gauge!("feed_client_connected").set(1.0);
        info!("[{}] WebSocket connected", self.config.label);

        // No replay on this channel: repair any gap before consuming live
        // events.
        if let Err(e) = self.reconcile().await {
            warn!("[{}] Reconciliation failed: {:?}", self.config.label, e);
        }

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset(); // Don't fire immediately

        loop {
            tokio::select! {
                // Handle incoming WebSocket messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            counter!("feed_client_messages_received_total").increment(1);
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(event) => {
                                    if let Err(e) = self.handler.on_event(event).await {
                                        error!("[{}] Error handling event: {:?}", self.config.label, e);
                                    }
                                }
                                Err(e) => {
                                    warn!("[{}] Undecodable server event: {:?}", self.config.label, e);
                                }
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            // The gateway never sends binary frames.
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("[{}] Received pong", self.config.label);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[{}] Received close frame: {:?}", self.config.label, frame);
                            return Err(Error::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {
                            // Raw frame, ignore
                        }
                        Some(Err(e)) => {
                            error!("[{}] WebSocket error: {:?}", self.config.label, e);
                            return Err(Error::WebSocket(e));
                        }
                        None => {
                            info!("[{}] WebSocket stream ended", self.config.label);
                            return Err(Error::ConnectionClosed);
                        }
                    }
                }

                // Handle control commands
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::MarkRead(ids)) => {
                            let msg = serde_json::to_string(&ClientMessage::MarkRead { ids })?;
                            write.send(Message::Text(msg)).await?;
                        }
                        Some(ControlCommand::Shutdown) => {
                            info!("[{}] Received shutdown command", self.config.label);
                            *shutdown = true;
                            let close_frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "Shutdown".into(),
                            };
                            let _ = write.send(Message::Close(Some(close_frame))).await;
                            return Ok(());
                        }
                        None => {
                            // Command channel closed, treat as shutdown
                            info!("[{}] Command channel closed", self.config.label);
                            *shutdown = true;
                            return Ok(());
                        }
                    }
                }

                // Send periodic pings
                _ = ping_interval.tick() => {
                    debug!("[{}] Sending ping", self.config.label);
                    write.send(Message::Ping(vec![])).await?;
                }
            }
        }
    }

    /// Fetch the presence snapshot and (when authenticated) the newest
    /// history page, and hand both to the handler.
    async fn reconcile(&self) -> Result<()> {
        let base = self.config.http_url.trim_end_matches('/');

        let snapshot: PresenceSnapshot = self
            .http
            .get(format!("{}/presence", base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page: Option<NotificationPage> = match &self.config.token {
            Some(token) => {
                let page = self
                    .http
                    .get(format!(
                        "{}/notifications?limit={}",
                        base, self.config.history_page_limit
                    ))
                    .bearer_auth(token)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Some(page)
            }
            None => None,
        };

        counter!("feed_client_reconciles_total").increment(1);
        self.handler.on_reconcile(snapshot.online, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_keeps_path_and_appends_token() {
        let url = ws_url_with_token("wss://rt.example.com/ws", Some("abc.def")).unwrap();
        assert_eq!(url.path(), "/ws");
        assert_eq!(url.query(), Some("token=abc.def"));
    }

    #[test]
    fn test_ws_url_without_token_has_no_query() {
        let url = ws_url_with_token("ws://localhost:8082/ws", None).unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(url.port_or_known_default(), Some(8082));
    }

    #[test]
    fn test_ws_default_ports() {
        let wss = ws_url_with_token("wss://rt.example.com/ws", None).unwrap();
        assert_eq!(wss.port_or_known_default(), Some(443));
        let ws = ws_url_with_token("ws://rt.example.com/ws", None).unwrap();
        assert_eq!(ws.port_or_known_default(), Some(80));
    }

    #[test]
    fn test_bad_url_is_rejected() {
        assert!(ws_url_with_token("not a url", None).is_err());
    }
}
