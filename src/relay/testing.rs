//! Test doubles for the relay's async seams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use portrelay_common::{OutboundMessage, PrometheusMetric};
use tokio::sync::mpsc;

use super::metrics::MetricsSource;
use super::upstream::{UpstreamConnector, UpstreamFrame, UpstreamLink};
use super::{Relay, RelaySettings};

/// Returns one sample whose value is the call count.
#[derive(Default)]
pub(crate) struct MockMetrics {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl MetricsSource for MockMetrics {
    async fn fetch(&self) -> Result<Vec<PrometheusMetric>> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            bail!("metrics endpoint unavailable");
        }
        Ok(vec![PrometheusMetric {
            key: "requests_total".to_string(),
            value: calls as f64,
        }])
    }
}

/// The remote end of one accepted mock connection. Dropping it closes the
/// connection as seen by the relay.
pub(crate) struct FakeUpstream {
    pub outgoing: mpsc::UnboundedReceiver<String>,
    pub frames: mpsc::UnboundedSender<UpstreamFrame>,
}

pub(crate) struct MockConnector {
    remotes: mpsc::UnboundedSender<FakeUpstream>,
    attempts: AtomicUsize,
    refuse: AtomicBool,
}

impl MockConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<UpstreamLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (frames, incoming) = mpsc::unbounded_channel();
        let _ = self.remotes.send(FakeUpstream {
            outgoing: outgoing_rx,
            frames,
        });
        Ok(UpstreamLink { outgoing, incoming })
    }
}

pub(crate) struct TestRelay {
    pub relay: Relay,
    pub metrics: Arc<MockMetrics>,
    pub connector: Arc<MockConnector>,
    pub remotes: mpsc::UnboundedReceiver<FakeUpstream>,
}

impl TestRelay {
    pub fn new(settings: RelaySettings) -> Self {
        let metrics = Arc::new(MockMetrics::default());
        let (remotes_tx, remotes) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            remotes: remotes_tx,
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        });
        let relay = Relay::new(settings, metrics.clone(), connector.clone());
        Self {
            relay,
            metrics,
            connector,
            remotes,
        }
    }
}

/// Wait (in virtual time, under `start_paused`) for the next message to a port.
pub(crate) async fn next_broadcast(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for a port message")
        .expect("port channel closed")
}
