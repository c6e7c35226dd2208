//! Routes inbound port messages.
//!
//! `subscribe`/`unsubscribe` are fire-and-forget. Anything else that carries
//! a `requestId` gets exactly one reply, `<type>_result` or `<type>_error`.
//! Messages with neither are dropped.

use futures_util::FutureExt;
use portrelay_common::{InboundMessage, OutboundMessage, PanelRequest, RequestKind, Topic};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Port, Relay};
use crate::errors::{RelayError, RelayResult};

#[derive(Debug, Deserialize)]
struct StoreArgs {
    store: String,
}

#[derive(Debug, Deserialize)]
struct KeyArgs {
    store: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct SetArgs {
    store: String,
    key: String,
    #[serde(default)]
    value: Value,
}

fn parse_payload<T: DeserializeOwned>(kind: RequestKind, payload: Option<Value>) -> RelayResult<T> {
    serde_json::from_value(payload.unwrap_or(Value::Null))
        .map_err(|e| RelayError::invalid_payload(kind.as_str(), e))
}

impl Relay {
    /// Handle one message from `port`.
    ///
    /// Subscriptions and synchronous handlers take effect before this
    /// returns, so a port's frames are applied in the order they arrived.
    /// Handlers that suspend (`fetch_metrics`) continue on a spawned task.
    pub fn dispatch(&self, port: &Port, message: InboundMessage) {
        debug!(
            port = %port.id(),
            kind = %message.kind,
            request_id = ?message.request_id,
            "message received"
        );

        match message.kind.as_str() {
            "subscribe" | "unsubscribe" => {
                let Some(topic) = parse_topic(&message) else {
                    return;
                };
                if message.kind == "subscribe" {
                    self.subscribe(port, topic);
                } else {
                    self.unsubscribe(port.id(), topic);
                }
            }
            _ => {
                // An empty id can't be correlated, so it counts as absent.
                let Some(request_id) = message.request_id.filter(|id| !id.is_empty()) else {
                    debug!(port = %port.id(), kind = %message.kind, "ignoring message without requestId");
                    return;
                };
                let kind = match message.kind.parse::<RequestKind>() {
                    Ok(kind) => kind,
                    Err(_) => {
                        warn!(port = %port.id(), kind = %message.kind, %request_id, "unknown request type");
                        port.post(OutboundMessage::error(
                            &message.kind,
                            format!("Unknown request type: {}", message.kind),
                            request_id,
                        ));
                        return;
                    }
                };

                let mut reply = Box::pin(self.clone().respond(port.clone(), kind, request_id, message.payload));
                if (&mut reply).now_or_never().is_none() {
                    tokio::spawn(reply);
                }
            }
        }
    }

    async fn respond(self, port: Port, kind: RequestKind, request_id: String, payload: Option<Value>) {
        let reply = match self.handle_request(kind, payload).await {
            Ok(value) => OutboundMessage::result(kind.as_str(), value, request_id),
            Err(e) => {
                warn!(port = %port.id(), %kind, %request_id, error = %e, "request failed");
                OutboundMessage::error(kind.as_str(), e.to_string(), request_id)
            }
        };
        if !port.post(reply) {
            debug!(port = %port.id(), %kind, "port closed before reply");
        }
    }

    /// Run a named handler. Independent of subscription state.
    pub async fn handle_request(&self, kind: RequestKind, payload: Option<Value>) -> RelayResult<Value> {
        match kind {
            RequestKind::FetchMetrics => self.fetch_metrics().await,
            RequestKind::ConnectWebsocket => {
                self.connect_upstream();
                Ok(Value::Bool(true))
            }
            RequestKind::SendWebsocket => {
                self.send_upstream(&payload.unwrap_or(Value::Null))?;
                Ok(Value::Bool(true))
            }
            RequestKind::CloseWebsocket => Ok(Value::Bool(self.close_upstream())),
            RequestKind::Panel => {
                let request: PanelRequest = parse_payload(kind, payload)?;
                Ok(serde_json::to_value(self.update_panel(request)?)?)
            }
            RequestKind::DbGet => {
                let args: KeyArgs = parse_payload(kind, payload)?;
                Ok(self
                    .lock()
                    .store
                    .get(&args.store, &args.key)?
                    .unwrap_or(Value::Null))
            }
            RequestKind::DbSet => {
                let args: SetArgs = parse_payload(kind, payload)?;
                self.lock().store.set(&args.store, args.key, args.value)?;
                Ok(Value::Bool(true))
            }
            RequestKind::DbDelete => {
                let args: KeyArgs = parse_payload(kind, payload)?;
                self.lock().store.delete(&args.store, &args.key)?;
                Ok(Value::Bool(true))
            }
            RequestKind::DbList => {
                let args: StoreArgs = parse_payload(kind, payload)?;
                Ok(Value::Array(self.lock().store.list(&args.store)?))
            }
        }
    }
}

fn parse_topic(message: &InboundMessage) -> Option<Topic> {
    let Some(raw) = message.topic.as_deref() else {
        warn!(kind = %message.kind, "missing topic");
        return None;
    };
    match raw.parse::<Topic>() {
        Ok(topic) => Some(topic),
        Err(e) => {
            warn!(kind = %message.kind, error = %e, "ignoring subscription");
            None
        }
    }
}
