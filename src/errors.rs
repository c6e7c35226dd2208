//! Typed errors for the relay.
//!
//! Request handlers return `RelayError`; the router turns each one into the
//! `error` string of a `<type>_error` reply. Startup and CLI paths use
//! `anyhow` instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("WebSocket is not connected")]
    NotConnected,

    #[error("Object store \"{0}\" does not exist")]
    UnknownStore(String),

    #[error("Invalid payload for {handler}: {message}")]
    InvalidPayload {
        handler: &'static str,
        message: String,
    },

    #[error("Fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),

    /// Reported to `websocket` subscribers as the `error` of a status event.
    #[error("{0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    pub fn invalid_payload(handler: &'static str, err: impl std::fmt::Display) -> Self {
        RelayError::InvalidPayload {
            handler,
            message: err.to_string(),
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_message_is_stable() {
        // Tabs match on this text.
        assert_eq!(RelayError::NotConnected.to_string(), "WebSocket is not connected");
    }

    #[test]
    fn unknown_store_names_the_store() {
        let err = RelayError::UnknownStore("servers".to_string());
        assert_eq!(err.to_string(), "Object store \"servers\" does not exist");
    }

    #[test]
    fn invalid_payload_carries_handler() {
        let err = RelayError::invalid_payload("db_get", "missing field `key`");
        match &err {
            RelayError::InvalidPayload { handler, message } => {
                assert_eq!(*handler, "db_get");
                assert!(message.contains("key"));
            }
            _ => panic!("Expected InvalidPayload"),
        }
    }

    #[test]
    fn fetch_error_keeps_source() {
        let err = RelayError::Fetch(anyhow::anyhow!("connection refused"));
        assert!(err.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn upstream_error_is_reported_verbatim() {
        let err = RelayError::Upstream("reset by peer".to_string());
        assert_eq!(err.to_string(), "reset by peer");
    }

    #[test]
    fn serde_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: RelayError = parse.into();
        assert!(matches!(err, RelayError::Serialization(_)));
    }
}
