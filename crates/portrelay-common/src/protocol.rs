use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Returned when a topic or request name is not part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} '{name}'")]
pub struct UnknownName {
    pub what: &'static str,
    pub name: String,
}

/// Logical channel a port can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Metrics,
    Websocket,
    Panel,
    Db,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Metrics, Topic::Websocket, Topic::Panel, Topic::Db];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Metrics => "metrics",
            Topic::Websocket => "websocket",
            Topic::Panel => "panel",
            Topic::Db => "db",
        }
    }

    /// The `fetch_<topic>` handler that feeds this topic's poller, if any.
    pub fn poll_handler(&self) -> Option<RequestKind> {
        match self {
            Topic::Metrics => Some(RequestKind::FetchMetrics),
            Topic::Websocket | Topic::Panel | Topic::Db => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownName {
                what: "topic",
                name: s.to_string(),
            })
    }
}

/// Request/response handlers a port can call by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    FetchMetrics,
    ConnectWebsocket,
    SendWebsocket,
    CloseWebsocket,
    Panel,
    DbGet,
    DbSet,
    DbDelete,
    DbList,
}

impl RequestKind {
    pub const ALL: [RequestKind; 9] = [
        RequestKind::FetchMetrics,
        RequestKind::ConnectWebsocket,
        RequestKind::SendWebsocket,
        RequestKind::CloseWebsocket,
        RequestKind::Panel,
        RequestKind::DbGet,
        RequestKind::DbSet,
        RequestKind::DbDelete,
        RequestKind::DbList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::FetchMetrics => "fetch_metrics",
            RequestKind::ConnectWebsocket => "connect_websocket",
            RequestKind::SendWebsocket => "send_websocket",
            RequestKind::CloseWebsocket => "close_websocket",
            RequestKind::Panel => "panel",
            RequestKind::DbGet => "db_get",
            RequestKind::DbSet => "db_set",
            RequestKind::DbDelete => "db_delete",
            RequestKind::DbList => "db_list",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownName {
                what: "request type",
                name: s.to_string(),
            })
    }
}

/// A frame posted by a tab.
///
/// `topic` stays a raw string so that a request carrying an unexpected
/// topic value is still routed and answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl InboundMessage {
    pub fn subscribe(topic: Topic) -> Self {
        Self {
            kind: "subscribe".to_string(),
            topic: Some(topic.as_str().to_string()),
            request_id: None,
            payload: None,
        }
    }

    pub fn unsubscribe(topic: Topic) -> Self {
        Self {
            kind: "unsubscribe".to_string(),
            topic: Some(topic.as_str().to_string()),
            request_id: None,
            payload: None,
        }
    }

    pub fn request(kind: impl Into<String>, request_id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            topic: None,
            request_id: Some(request_id.into()),
            payload,
        }
    }
}

/// A frame sent from the hub to a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Broadcast {
        topic: Topic,
        payload: Value,
    },
    Result {
        #[serde(rename = "type")]
        kind: String,
        payload: Value,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Error {
        #[serde(rename = "type")]
        kind: String,
        error: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

impl OutboundMessage {
    pub fn result(kind: &str, payload: Value, request_id: impl Into<String>) -> Self {
        OutboundMessage::Result {
            kind: format!("{kind}_result"),
            payload,
            request_id: request_id.into(),
        }
    }

    pub fn error(kind: &str, error: impl Into<String>, request_id: impl Into<String>) -> Self {
        OutboundMessage::Error {
            kind: format!("{kind}_error"),
            error: error.into(),
            request_id: request_id.into(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            OutboundMessage::Broadcast { .. } => None,
            OutboundMessage::Result { request_id, .. } | OutboundMessage::Error { request_id, .. } => {
                Some(request_id)
            }
        }
    }
}

/// Connection status events broadcast on the `websocket` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebsocketStatus {
    Connected,
    Disconnected,
    Error { error: String },
}

/// One `name value` sample from a Prometheus text exposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusMetric {
    pub key: String,
    pub value: f64,
}
