//! Shared wire types for the portrelay hub.
//!
//! Tabs talk to the hub with JSON objects. Inbound frames are
//! [`InboundMessage`]; everything the hub sends back is an
//! [`OutboundMessage`], either a topic broadcast or a reply correlated by
//! `requestId`.

pub mod panel;
pub mod protocol;

pub use panel::{PanelAction, PanelRequest, PanelState};
pub use protocol::{
    InboundMessage, OutboundMessage, PrometheusMetric, RequestKind, Topic, UnknownName,
    WebsocketStatus,
};
