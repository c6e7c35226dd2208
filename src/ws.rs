use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use portrelay_common::{InboundMessage, OutboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::relay::{Port, Relay};
use crate::server::AppState;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the port dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Port handler ─────────────────────────────────────────────────────

/// Each upgraded connection becomes one port of the relay.
pub async fn port_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_port(socket, state))
}

async fn handle_port(socket: WebSocket, state: Arc<AppState>) {
    let (port, rx) = Port::new();
    let id = port.id();
    let open = state.port_opened();
    info!(port = %id, open, "port connected");

    let (sender, receiver) = socket.split();
    run_port_loop(sender, receiver, rx, &state.relay, &port).await;

    state.relay.disconnect(id);
    let open = state.port_closed();
    info!(port = %id, open, "port disconnected");
}

/// Core port loop with ping/pong keepalive.
///
/// Forwards relay output to the tab, feeds tab frames to the relay, and
/// pings periodically. If no Pong arrives within [`PONG_TIMEOUT`] after a
/// Ping, the port is considered dead and the loop exits.
async fn run_port_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    relay: &Relay,
    port: &Port,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    warn!(port = %port.id(), "no pong received; dropping port");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Relay → tab ─────────────────────────────────────────
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(
                        port = %port.id(),
                        request_id = ?message.request_id(),
                        error = %e,
                        "failed to serialize outbound message"
                    ),
                }
            }

            // ── Tab → relay ─────────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundMessage>(text.as_str()) {
                            Ok(message) => relay.dispatch(port, message),
                            Err(e) => warn!(port = %port.id(), error = %e, "dropping malformed port message"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(data))) => {
                        debug!(port = %port.id(), bytes = data.len(), "ignoring binary port frame");
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Err(e)) => {
                        debug!(port = %port.id(), error = %e, "port read error");
                        break;
                    }
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
