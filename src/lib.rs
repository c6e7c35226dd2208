//! portrelay: a topic-based pub/sub relay that browser tabs share over
//! WebSocket "ports". Tabs subscribe to topics, the relay polls or streams
//! upstream data only while a topic has subscribers, and request/response
//! handlers answer by `requestId`.

pub mod config;
pub mod errors;
pub mod logging;
pub mod relay;
pub mod server;
pub mod ws;

pub use config::RelayConfig;
pub use errors::{RelayError, RelayResult};
pub use relay::{Port, PortId, Relay, RelaySettings};
