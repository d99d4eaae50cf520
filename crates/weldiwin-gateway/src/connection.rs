use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use weldiwin_types::events::GatewayEvent;
use weldiwin_types::models::Actor;

use crate::Gateway;
use crate::session::Session;

const PING_EVERY: Duration = Duration::from_secs(15);
/// Unanswered pings tolerated before the socket is considered dead.
const MAX_UNANSWERED_PINGS: u8 = 2;

/// Ping/pong bookkeeping shared by the reader (which sees pongs) and the
/// writer (which sends pings).
#[derive(Clone)]
struct Liveness {
    answered: Arc<AtomicBool>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            answered: Arc::new(AtomicBool::new(true)),
        }
    }

    fn pong(&self) {
        self.answered.store(true, Ordering::Release);
    }

    /// Called on every ping tick. Returns the updated count of pings in a
    /// row that got no pong.
    fn tick(&self, unanswered: u8) -> u8 {
        if self.answered.swap(false, Ordering::Acquire) {
            0
        } else {
            unanswered.saturating_add(1)
        }
    }
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            None
        }
    }
}

/// Runs one WebSocket connection. The handshake token was already resolved
/// at the HTTP upgrade layer; `actor` is `None` when it was missing or
/// invalid, and the connection then stays open but restricted.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, actor: Option<Actor>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    match &actor {
        Some(actor) => info!("{} connected to gateway", actor.id),
        None => info!("Unauthenticated client connected to gateway"),
    }

    let Some(ready) = encode(&GatewayEvent::Ready {
        actor: actor.clone(),
    }) else {
        return;
    };
    if ws_tx.send(ready).await.is_err() {
        return;
    }

    let (conn_id, mut outbox) = gateway
        .dispatcher
        .register(actor.as_ref().map(|a| a.id))
        .await;
    let session = Arc::new(Session::new(gateway.clone(), conn_id, actor));
    let liveness = Liveness::new();

    // Sole writer: room events, acks and pings.
    let writer_liveness = liveness.clone();
    let mut writer = tokio::spawn(async move {
        let mut pings = tokio::time::interval(PING_EVERY);
        pings.tick().await;
        let mut unanswered = 0u8;

        loop {
            tokio::select! {
                event = outbox.recv() => {
                    let Some(event) = event else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if ws_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = pings.tick() => {
                    unanswered = writer_liveness.tick(unanswered);
                    if unanswered >= MAX_UNANSWERED_PINGS {
                        warn!("Connection {} stopped answering pings, closing", conn_id);
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_session = session.clone();
    let reader_gateway = gateway.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                Message::Text(text) => {
                    let ack = reader_session.handle_text(text.as_str()).await;
                    reader_gateway
                        .dispatcher
                        .send_to(reader_session.conn_id(), ack)
                        .await;
                }
                Message::Pong(_) => liveness.pong(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    session.close().await;
    match session.actor() {
        Some(actor) => info!("{} disconnected from gateway (conn {})", actor.id, conn_id),
        None => info!("Unauthenticated connection {} closed", conn_id),
    }
}
