use std::fmt;

use portrelay_common::OutboundMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(Uuid);

impl PortId {
    pub fn new() -> Self {
        PortId(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of one connected tab.
///
/// The relay only ever holds clones of this handle; the tab's connection
/// task owns the receiving end and decides when the port goes away.
#[derive(Debug, Clone)]
pub struct Port {
    id: PortId,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Port {
    pub fn new() -> (Port, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Port { id: PortId::new(), tx }, rx)
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    /// Queue a message for the tab. Returns false if the tab is gone.
    pub fn post(&self, message: OutboundMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portrelay_common::Topic;
    use serde_json::json;

    #[test]
    fn ports_get_distinct_ids() {
        let (a, _rx_a) = Port::new();
        let (b, _rx_b) = Port::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn post_after_receiver_dropped_reports_false() {
        let (port, rx) = Port::new();
        let msg = OutboundMessage::Broadcast {
            topic: Topic::Db,
            payload: json!(1),
        };
        assert!(port.post(msg.clone()));
        drop(rx);
        assert!(port.is_closed());
        assert!(!port.post(msg));
    }
}
