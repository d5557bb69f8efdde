//! Watch a realtime feed from the terminal.
//!
//! Connects to a local gateway and prints presence and notification events
//! as they arrive. `GATEWAY_WS`, `GATEWAY_HTTP`, and `GATEWAY_TOKEN`
//! override the defaults; without a token this watches public presence
//! only.

use async_trait::async_trait;
use client::error::Result;
use client::{ControlCommand, FeedClient, FeedClientConfig, FeedHandler};
use common::protocol::{NotificationPage, ServerMessage};
use common::types::PrincipalId;
use std::env;
use tokio::sync::mpsc;

struct Printer;

#[async_trait]
impl FeedHandler for Printer {
    async fn on_event(&self, event: ServerMessage) -> Result<()> {
        match event {
            ServerMessage::PresenceUpdate { online } => {
                println!("online now: {:?}", online);
            }
            ServerMessage::FeedSnapshot {
                items,
                unread_count,
            } => {
                println!("feed snapshot: {} items, {} unread", items.len(), unread_count);
            }
            ServerMessage::NotificationNew { notification } => {
                println!(
                    "new notification #{} ({:?})",
                    notification.id, notification.payload.kind
                );
            }
            ServerMessage::NotificationRead { ids, updated } => {
                println!("marked read: {} ({:?})", updated, ids);
            }
            ServerMessage::Pong => {}
            ServerMessage::Error { message, code } => {
                eprintln!("gateway error [{}]: {}", code, message);
            }
        }
        Ok(())
    }

    async fn on_reconcile(
        &self,
        online: Vec<PrincipalId>,
        page: Option<NotificationPage>,
    ) -> Result<()> {
        println!("reconciled: {} principals online", online.len());
        if let Some(page) = page {
            println!("  history page: {} items", page.items.len());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = FeedClientConfig {
        ws_url: env::var("GATEWAY_WS").unwrap_or_else(|_| "ws://localhost:8082/ws".to_string()),
        http_url: env::var("GATEWAY_HTTP")
            .unwrap_or_else(|_| "http://localhost:8082".to_string()),
        token: env::var("GATEWAY_TOKEN").ok(),
        ..Default::default()
    };

    let (command_tx, command_rx) = mpsc::channel(8);
    let client = FeedClient::new(Printer, config, command_rx);
    let handle = tokio::spawn(client.run());

    tokio::signal::ctrl_c().await.ok();
    let _ = command_tx.send(ControlCommand::Shutdown).await;
    let _ = handle.await;
}
