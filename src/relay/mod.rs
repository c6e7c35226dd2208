//! Cross-tab pub/sub relay.
//!
//! ## Overview
//!
//! Every connected tab is a [`Port`]. Ports subscribe to topics and send
//! request/response calls; the relay owns the shared resources behind the
//! topics so that N tabs cost one metrics poller and one upstream socket.
//!
//! ```text
//! ┌──────────┐  subscribe/unsubscribe  ┌───────────────────────────────┐
//! │  Port A  │ ──────────────────────> │ registry.rs  Topic → [Port]   │
//! │  Port B  │ <────── broadcast ───── │    │ 0→1 / 1→0 transitions    │
//! └──────────┘                         │    v                          │
//!      │ requests (requestId)          │ poller.rs   metrics interval  │
//!      v                               │ upstream.rs single WebSocket  │
//! router.rs ── <type>_result/_error ──>│ store.rs    db_* stores       │
//!                                      └───────────────────────────────┘
//! ```
//!
//! All mutable state sits behind one mutex inside [`Relay`]. It is only
//! ever held for synchronous sections and never across an `.await`, so
//! each mutation runs to completion before the next one starts.

pub mod metrics;
pub mod poller;
pub mod port;
pub mod registry;
pub mod router;
pub mod store;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use portrelay_common::{PanelRequest, PanelState, RequestKind, Topic};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::errors::{RelayError, RelayResult};

pub use metrics::{HttpMetricsSource, MetricsSource, parse_prometheus_metrics};
pub use poller::PollerManager;
pub use port::{Port, PortId};
pub use registry::Registry;
pub use store::{KNOWN_STORES, KvStore};
pub use upstream::{ReadyState, TungsteniteConnector, UpstreamConnector, UpstreamFrame, UpstreamLink};

/// Timing and endpoint settings the relay needs at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub ws_url: String,
    pub reconnect_when_idle: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            reconnect_delay: config.reconnect_delay(),
            ws_url: config.upstream.ws_url.clone(),
            reconnect_when_idle: config.websocket.reconnect_when_idle,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RelayState {
    pub(crate) registry: Registry,
    pub(crate) pollers: PollerManager,
    pub(crate) upstream: upstream::UpstreamState,
    pub(crate) panel: Option<PanelState>,
    pub(crate) store: KvStore,
}

struct Inner {
    settings: RelaySettings,
    metrics: Arc<dyn MetricsSource>,
    connector: Arc<dyn UpstreamConnector>,
    state: Mutex<RelayState>,
}

/// Handle to the relay. Clones share the same state.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

impl Relay {
    pub fn new(
        settings: RelaySettings,
        metrics: Arc<dyn MetricsSource>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                metrics,
                connector,
                state: Mutex::new(RelayState::default()),
            }),
        }
    }

    /// Build a relay that scrapes `{api_base}/metrics` over HTTP and
    /// connects upstream with tokio-tungstenite.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let metrics = HttpMetricsSource::new(config.metrics_url(), config.polling.metrics_limit)?;
        debug!(url = metrics.url(), ws_url = %config.upstream.ws_url, "relay endpoints");
        Ok(Self::new(
            RelaySettings::from_config(config),
            Arc::new(metrics),
            Arc::new(TungsteniteConnector),
        ))
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.inner.settings
    }

    // State is never left half-updated, so a panic elsewhere doesn't make it unusable.
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `port` to `topic`, starting the topic's poller on its first
    /// subscriber and opening the upstream socket for `websocket`.
    pub fn subscribe(&self, port: &Port, topic: Topic) {
        let mut state = self.lock();
        let activated = state.registry.subscribe(port.clone(), topic);
        debug!(port = %port.id(), %topic, activated, "subscribed");

        if activated {
            if let Some(handler) = topic.poll_handler() {
                self.start_polling(&mut state, topic, handler);
            }
        }
        if topic == Topic::Websocket {
            self.connect_locked(&mut state.upstream);
        }
    }

    /// Remove `port` from `topic`; the last one out stops the poller or
    /// closes the socket. Unknown ports are ignored.
    pub fn unsubscribe(&self, port: PortId, topic: Topic) {
        let mut state = self.lock();
        self.unsubscribe_locked(&mut state, port, topic);
    }

    fn unsubscribe_locked(&self, state: &mut RelayState, port: PortId, topic: Topic) {
        if !state.registry.unsubscribe(port, topic) {
            return;
        }
        debug!(%port, %topic, "topic has no subscribers left");
        if topic.poll_handler().is_some() {
            state.pollers.stop(topic);
        } else if topic == Topic::Websocket && state.upstream.close() {
            info!("closing upstream websocket");
        }
    }

    /// Drop every subscription held by a port that went away.
    pub fn disconnect(&self, port: PortId) {
        let mut state = self.lock();
        let topics = state.registry.topics_of(port);
        for topic in topics {
            self.unsubscribe_locked(&mut state, port, topic);
        }
    }

    /// Send `{topic, payload}` to every subscriber of `topic`.
    /// Returns the number of ports reached; zero subscribers is not an error.
    pub fn broadcast(&self, topic: Topic, payload: Value) -> usize {
        self.lock().registry.broadcast(topic, &payload)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.lock().registry.subscriber_count(topic)
    }

    pub fn is_subscribed(&self, port: PortId, topic: Topic) -> bool {
        self.lock().registry.is_subscribed(port, topic)
    }

    pub fn is_polling(&self, topic: Topic) -> bool {
        self.lock().pollers.is_running(topic)
    }

    /// Subscriber count per active topic.
    pub fn topic_counts(&self) -> BTreeMap<Topic, usize> {
        self.lock().registry.counts()
    }

    fn start_polling(&self, state: &mut RelayState, topic: Topic, handler: RequestKind) {
        let relay = self.clone();
        state.pollers.start(topic, self.inner.settings.poll_interval, move || {
            relay.clone().poll_once(topic, handler)
        });
    }

    /// One tick: run the topic's handler and broadcast the result. A failed
    /// tick is logged and skipped.
    async fn poll_once(self, topic: Topic, handler: RequestKind) {
        match self.handle_request(handler, None).await {
            Ok(payload) => {
                self.broadcast(topic, payload);
            }
            Err(e) => warn!(%topic, %handler, error = %e, "polling error"),
        }
    }

    pub async fn fetch_metrics(&self) -> RelayResult<Value> {
        let metrics = self.inner.metrics.fetch().await.map_err(RelayError::Fetch)?;
        Ok(serde_json::to_value(metrics)?)
    }

    /// Apply a panel request, broadcast the new state on `panel`, and
    /// return it.
    pub fn update_panel(&self, request: PanelRequest) -> RelayResult<PanelState> {
        let mut state = self.lock();
        let next = PanelState::apply(state.panel.as_ref(), request);
        state.panel = Some(next.clone());
        state
            .registry
            .broadcast(Topic::Panel, &serde_json::to_value(&next)?);
        Ok(next)
    }

    pub fn panel(&self) -> Option<PanelState> {
        self.lock().panel.clone()
    }
}
