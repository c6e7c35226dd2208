//! The single upstream WebSocket shared by every `websocket` subscriber.
//!
//! ```text
//! disconnected ──connect──> connecting ──handshake ok──> connected
//!      ^                        │                            │
//!      │                   handshake err               close / drop
//!      │                        v                            v
//!      └──── reconnect delay ── closed <─────────────────────┘
//! ```
//!
//! Every close, including one requested with `close_websocket`, schedules a
//! reconnect after the configured delay. Set `reconnect_when_idle = false`
//! to skip it while the topic has no subscribers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use portrelay_common::{Topic, WebsocketStatus};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::Relay;
use crate::errors::{RelayError, RelayResult};

/// One frame or failure reported by the upstream transport.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    Text(String),
    Error(String),
}

/// An open upstream connection.
///
/// Dropping `outgoing` asks the transport to close. The transport drops
/// its end of `incoming` once the connection is gone, which is how the
/// relay observes a close.
pub struct UpstreamLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<UpstreamFrame>,
}

/// Opens upstream connections.
/// Real implementation: `TungsteniteConnector`.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Resolves once the handshake has completed.
    async fn connect(&self, url: &str) -> Result<UpstreamLink>;
}

pub struct TungsteniteConnector;

#[async_trait]
impl UpstreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<UpstreamLink> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        let (mut write, mut read) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outgoing_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                let _ = incoming_tx.send(UpstreamFrame::Error(e.to_string()));
                                break;
                            }
                        }
                        None => {
                            // Best-effort close frame
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    inbound = read.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if incoming_tx.send(UpstreamFrame::Text(text.as_str().to_owned())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!(bytes = data.len(), "dropping binary upstream frame");
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = incoming_tx.send(UpstreamFrame::Error(e.to_string()));
                            break;
                        }
                    },
                }
            }
        });

        Ok(UpstreamLink { outgoing, incoming })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
}

#[derive(Debug)]
struct Socket {
    generation: u64,
    ready: ReadyState,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    close_tx: Option<oneshot::Sender<()>>,
}

/// Relay-side bookkeeping for the socket. Generations keep a late close
/// event from an old socket from clearing its replacement.
#[derive(Debug, Default)]
pub struct UpstreamState {
    socket: Option<Socket>,
    generation: u64,
}

impl UpstreamState {
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.socket.as_ref().map(|socket| socket.ready)
    }

    pub(super) fn begin(&mut self, close_tx: oneshot::Sender<()>) -> u64 {
        self.generation += 1;
        self.socket = Some(Socket {
            generation: self.generation,
            ready: ReadyState::Connecting,
            outgoing: None,
            close_tx: Some(close_tx),
        });
        self.generation
    }

    pub(super) fn mark_open(&mut self, generation: u64, outgoing: mpsc::UnboundedSender<String>) -> bool {
        match self.socket.as_mut() {
            Some(socket) if socket.generation == generation => {
                socket.ready = ReadyState::Open;
                socket.outgoing = Some(outgoing);
                true
            }
            _ => false,
        }
    }

    pub(super) fn clear(&mut self, generation: u64) {
        if self
            .socket
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
        {
            self.socket = None;
        }
    }

    pub(super) fn send(&self, text: String) -> RelayResult<()> {
        let outgoing = self
            .socket
            .as_ref()
            .filter(|socket| socket.ready == ReadyState::Open)
            .and_then(|socket| socket.outgoing.as_ref())
            .ok_or(RelayError::NotConnected)?;
        outgoing.send(text).map_err(|_| RelayError::NotConnected)
    }

    pub(super) fn close(&mut self) -> bool {
        match self.socket.take() {
            Some(mut socket) => {
                if let Some(close_tx) = socket.close_tx.take() {
                    let _ = close_tx.send(());
                }
                true
            }
            None => false,
        }
    }
}

impl Relay {
    /// Open the upstream socket unless one is already connecting or open.
    /// Returns true if a new connection attempt was started.
    pub fn connect_upstream(&self) -> bool {
        let mut state = self.lock();
        self.connect_locked(&mut state.upstream)
    }

    pub(super) fn connect_locked(&self, upstream: &mut UpstreamState) -> bool {
        if upstream.ready_state().is_some() {
            return false;
        }
        let (close_tx, close_rx) = oneshot::channel();
        let generation = upstream.begin(close_tx);
        debug!(generation, url = %self.inner.settings.ws_url, "connecting upstream websocket");
        tokio::spawn(self.clone().run_upstream(generation, close_rx));
        true
    }

    /// Serialize `payload` and write it to the open socket.
    pub fn send_upstream(&self, payload: &Value) -> RelayResult<()> {
        let text = serde_json::to_string(payload)?;
        self.lock().upstream.send(text)
    }

    /// Close the socket if there is one. The close event that follows
    /// broadcasts `disconnected` and schedules a reconnect as usual.
    pub fn close_upstream(&self) -> bool {
        let closed = self.lock().upstream.close();
        if closed {
            info!("closing upstream websocket");
        } else {
            debug!("close requested with no upstream websocket");
        }
        closed
    }

    pub fn upstream_state(&self) -> Option<ReadyState> {
        self.lock().upstream.ready_state()
    }

    async fn run_upstream(self, generation: u64, mut close_rx: oneshot::Receiver<()>) {
        let url = self.inner.settings.ws_url.clone();
        let attempt = tokio::select! {
            result = self.inner.connector.connect(&url) => Some(result),
            _ = &mut close_rx => None,
        };

        match attempt {
            Some(Ok(link)) => self.pump_upstream(generation, link, close_rx).await,
            Some(Err(e)) => self.report_upstream_error(generation, RelayError::Upstream(format!("{:#}", e))),
            None => {}
        }

        self.on_upstream_closed(generation);
    }

    async fn pump_upstream(&self, generation: u64, link: UpstreamLink, mut close_rx: oneshot::Receiver<()>) {
        let UpstreamLink { outgoing, mut incoming } = link;
        if !self.lock().upstream.mark_open(generation, outgoing) {
            return;
        }
        info!(generation, "upstream websocket connected");
        self.broadcast_status(WebsocketStatus::Connected);

        loop {
            tokio::select! {
                frame = incoming.recv() => match frame {
                    Some(UpstreamFrame::Text(text)) => self.relay_upstream_text(&text),
                    Some(UpstreamFrame::Error(message)) => {
                        self.report_upstream_error(generation, RelayError::Upstream(message));
                    }
                    None => break,
                },
                _ = &mut close_rx => break,
            }
        }
    }

    /// Log and broadcast an error status. Does not close the socket.
    fn report_upstream_error(&self, generation: u64, err: RelayError) {
        error!(generation, error = %err, "upstream websocket error");
        self.broadcast_status(WebsocketStatus::Error { error: err.to_string() });
    }

    fn relay_upstream_text(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(message) => {
                self.broadcast(Topic::Websocket, message);
            }
            Err(e) => {
                warn!(error = %e, data = %text, "dropping invalid JSON from upstream websocket");
            }
        }
    }

    fn on_upstream_closed(&self, generation: u64) {
        warn!(generation, "upstream websocket disconnected");
        self.broadcast_status(WebsocketStatus::Disconnected);

        let idle = {
            let mut state = self.lock();
            state.upstream.clear(generation);
            state.registry.subscriber_count(Topic::Websocket) == 0
        };
        if idle && !self.inner.settings.reconnect_when_idle {
            debug!(generation, "no websocket subscribers; not reconnecting");
            return;
        }

        let relay = self.clone();
        let delay = self.inner.settings.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            relay.connect_upstream();
        });
    }

    fn broadcast_status(&self, status: WebsocketStatus) {
        match serde_json::to_value(&status) {
            Ok(payload) => {
                self.broadcast(Topic::Websocket, payload);
            }
            Err(e) => error!(error = %e, "failed to serialize websocket status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{FakeUpstream, TestRelay, next_broadcast};
    use crate::relay::{Port, RelaySettings};
    use portrelay_common::OutboundMessage;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn status(value: Value) -> OutboundMessage {
        OutboundMessage::Broadcast {
            topic: Topic::Websocket,
            payload: value,
        }
    }

    async fn next_remote(harness: &mut TestRelay) -> FakeUpstream {
        tokio::time::timeout(Duration::from_secs(10), harness.remotes.recv())
            .await
            .expect("no upstream connection attempt")
            .expect("connector dropped")
    }

    #[tokio::test(start_paused = true)]
    async fn both_subscribers_see_connected_from_one_socket() {
        let mut harness = TestRelay::new(RelaySettings::default());
        let (p1, mut rx1) = Port::new();
        let (p2, mut rx2) = Port::new();

        harness.relay.subscribe(&p1, Topic::Websocket);
        harness.relay.subscribe(&p2, Topic::Websocket);
        let _remote = next_remote(&mut harness).await;

        assert_eq!(next_broadcast(&mut rx1).await, status(json!({"status": "connected"})));
        assert_eq!(next_broadcast(&mut rx2).await, status(json!({"status": "connected"})));
        assert_eq!(harness.connector.attempts(), 1);
        assert_eq!(harness.relay.upstream_state(), Some(ReadyState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_never_broadcast() {
        let mut harness = TestRelay::new(RelaySettings::default());
        let (p1, mut rx1) = Port::new();
        harness.relay.subscribe(&p1, Topic::Websocket);
        let remote = next_remote(&mut harness).await;
        next_broadcast(&mut rx1).await;

        remote.frames.send(UpstreamFrame::Text("{not json".into())).unwrap();
        remote.frames.send(UpstreamFrame::Text(r#"{"event":"join","user":7}"#.into())).unwrap();

        assert_eq!(
            next_broadcast(&mut rx1).await,
            status(json!({"event": "join", "user": 7}))
        );
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn error_frame_is_broadcast_without_closing() {
        let mut harness = TestRelay::new(RelaySettings::default());
        let (p1, mut rx1) = Port::new();
        harness.relay.subscribe(&p1, Topic::Websocket);
        let remote = next_remote(&mut harness).await;
        next_broadcast(&mut rx1).await;

        remote.frames.send(UpstreamFrame::Error("reset by peer".into())).unwrap();
        assert_eq!(
            next_broadcast(&mut rx1).await,
            status(json!({"status": "error", "error": "reset by peer"}))
        );
        assert_eq!(harness.relay.upstream_state(), Some(ReadyState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_broadcasts_and_reconnects_after_delay() {
        let mut harness = TestRelay::new(RelaySettings::default());
        let (p1, mut rx1) = Port::new();
        harness.relay.subscribe(&p1, Topic::Websocket);
        let remote = next_remote(&mut harness).await;
        next_broadcast(&mut rx1).await;

        let closed_at = Instant::now();
        drop(remote);
        assert_eq!(next_broadcast(&mut rx1).await, status(json!({"status": "disconnected"})));
        assert_eq!(harness.relay.upstream_state(), None);

        let _again = next_remote(&mut harness).await;
        assert!(closed_at.elapsed() >= Duration::from_millis(3000));
        assert_eq!(next_broadcast(&mut rx1).await, status(json!({"status": "connected"})));
        assert_eq!(harness.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_handshake_reports_error_then_disconnect_and_retries() {
        let mut harness = TestRelay::new(RelaySettings::default());
        harness.connector.refuse(true);
        let (p1, mut rx1) = Port::new();
        harness.relay.subscribe(&p1, Topic::Websocket);

        match next_broadcast(&mut rx1).await {
            OutboundMessage::Broadcast { payload, .. } => {
                assert_eq!(payload["status"], "error");
                assert!(payload["error"].as_str().unwrap().contains("connection refused"));
            }
            other => panic!("Expected broadcast, got {:?}", other),
        }
        assert_eq!(next_broadcast(&mut rx1).await, status(json!({"status": "disconnected"})));

        harness.connector.refuse(false);
        let _remote = next_remote(&mut harness).await;
        assert_eq!(next_broadcast(&mut rx1).await, status(json!({"status": "connected"})));
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_an_open_socket() {
        let mut harness = TestRelay::new(RelaySettings::default());
        assert!(matches!(
            harness.relay.send_upstream(&json!({"op": "ping"})),
            Err(RelayError::NotConnected)
        ));

        harness.relay.connect_upstream();
        let mut remote = next_remote(&mut harness).await;
        tokio::task::yield_now().await;

        harness.relay.send_upstream(&json!({"op": "ping"})).unwrap();
        assert_eq!(remote.outgoing.recv().await.unwrap(), r#"{"op":"ping"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_a_no_op_while_connecting_or_open() {
        let mut harness = TestRelay::new(RelaySettings::default());
        assert!(harness.relay.connect_upstream());
        assert!(!harness.relay.connect_upstream());
        let _remote = next_remote(&mut harness).await;
        tokio::task::yield_now().await;
        assert!(!harness.relay.connect_upstream());
        assert_eq!(harness.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_close_still_reconnects_when_idle_reconnect_enabled() {
        let mut harness = TestRelay::new(RelaySettings::default());
        assert!(!harness.relay.close_upstream());

        harness.relay.connect_upstream();
        let _first = next_remote(&mut harness).await;
        tokio::task::yield_now().await;

        assert!(harness.relay.close_upstream());
        assert_eq!(harness.relay.upstream_state(), None);

        let _second = next_remote(&mut harness).await;
        assert_eq!(harness.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_reconnect_can_be_disabled() {
        let settings = RelaySettings {
            reconnect_when_idle: false,
            ..RelaySettings::default()
        };
        let mut harness = TestRelay::new(settings);
        let (p1, _rx1) = Port::new();
        harness.relay.subscribe(&p1, Topic::Websocket);
        let _remote = next_remote(&mut harness).await;
        tokio::task::yield_now().await;

        harness.relay.unsubscribe(p1.id(), Topic::Websocket);
        assert_eq!(harness.relay.upstream_state(), None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(harness.remotes.try_recv().is_err());
        assert_eq!(harness.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_close_of_old_socket_keeps_the_new_one() {
        let mut harness = TestRelay::new(RelaySettings::default());
        harness.relay.connect_upstream();
        let _first = next_remote(&mut harness).await;
        tokio::task::yield_now().await;

        // Close and immediately reopen before the old task observes the close.
        assert!(harness.relay.close_upstream());
        assert!(harness.relay.connect_upstream());
        let _second = next_remote(&mut harness).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(harness.relay.upstream_state(), Some(ReadyState::Open));
    }
}
