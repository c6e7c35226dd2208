//! Shared side-panel state, one per hub.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelAction {
    Open,
    Close,
    Toggle,
}

/// Payload of a `panel` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRequest {
    #[serde(rename = "type")]
    pub action: PanelAction,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelState {
    pub open: bool,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl PanelState {
    /// Apply a request to the current state. Toggling the panel that is
    /// already shown flips it; toggling any other id opens that one.
    pub fn apply(current: Option<&PanelState>, request: PanelRequest) -> PanelState {
        match request.action {
            PanelAction::Open => PanelState {
                open: true,
                id: request.id,
                payload: request.payload,
            },
            PanelAction::Close => PanelState {
                open: false,
                id: request.id,
                payload: None,
            },
            PanelAction::Toggle => {
                let open = match current {
                    Some(state) if state.id == request.id => !state.open,
                    _ => true,
                };
                PanelState {
                    open,
                    id: request.id,
                    payload: request.payload,
                }
            }
        }
    }
}
